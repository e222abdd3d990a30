//! Session description rewriting
//!
//! Pure string transforms applied to outgoing SDP before it is handed to
//! signaling. Each transform returns the input unchanged when the section it
//! targets is absent.

use serde::{Deserialize, Serialize};

/// Codec moved to the front of the video payload list
pub const PREFERRED_VIDEO_CODEC: &str = "H264";

/// Value of the `x-google-min-bitrate` hint appended to video fmtp lines (kbps)
pub const MIN_BITRATE_HINT_KBPS: u32 = 100;

const MIN_BITRATE_KEY: &str = "x-google-min-bitrate=";

/// Payload names that are not real codecs and get no feedback lines
const AUXILIARY_CODECS: &[&str] = &["rtx", "red", "ulpfec", "flexfec-03"];

/// Options for [`apply_transforms`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SdpTransformOptions {
    pub prefer_h264: bool,
    /// Video bandwidth cap in bits per second
    pub max_bitrate: Option<u32>,
    pub optimize_latency: bool,
}

impl Default for SdpTransformOptions {
    fn default() -> Self {
        Self {
            prefer_h264: true,
            max_bitrate: None,
            optimize_latency: true,
        }
    }
}

/// Apply codec preference, bitrate cap and latency tuning, in that order
pub fn apply_transforms(sdp: &str, options: &SdpTransformOptions) -> String {
    let mut out = sdp.to_string();
    if options.prefer_h264 {
        out = prefer_codec(&out, PREFERRED_VIDEO_CODEC);
    }
    if let Some(bps) = options.max_bitrate {
        out = set_video_bitrate(&out, bps.div_ceil(1000));
    }
    if options.optimize_latency {
        out = optimize_latency(&out);
    }
    tracing::debug!(
        "Transformed SDP ({} -> {} bytes, {:?})",
        sdp.len(),
        out.len(),
        options
    );
    out
}

/// Move the payload types of `codec` to the front of the video m-line
pub fn prefer_codec(sdp: &str, codec: &str) -> String {
    let mut parsed = ParsedSdp::parse(sdp);
    let Some(video) = parsed.media.iter_mut().find(|m| m.kind() == "video") else {
        return sdp.to_string();
    };

    let preferred: Vec<String> = video
        .rtpmaps()
        .filter(|(_, name)| name.eq_ignore_ascii_case(codec))
        .map(|(pt, _)| pt.to_string())
        .collect();
    if preferred.is_empty() {
        return sdp.to_string();
    }

    let m_line = video.lines[0].clone();
    let mut tokens = m_line.split_whitespace();
    let header: Vec<&str> = tokens.by_ref().take(3).collect();
    let formats: Vec<&str> = tokens.collect();
    if header.len() < 3 {
        return sdp.to_string();
    }

    let mut reordered: Vec<&str> = formats
        .iter()
        .copied()
        .filter(|f| preferred.iter().any(|p| p == f))
        .collect();
    reordered.extend(formats.iter().copied().filter(|f| !preferred.iter().any(|p| p == f)));
    if reordered == formats {
        return sdp.to_string();
    }

    video.lines[0] = format!("{} {}", header.join(" "), reordered.join(" "));
    parsed.render()
}

/// Cap the video section's bandwidth with a single `b=AS:<kbps>` line
///
/// The line goes before the section's first `a=ssrc` line, or at the end of
/// the video section (ahead of the next m-line) when there is none.
pub fn set_video_bitrate(sdp: &str, kbps: u32) -> String {
    let mut parsed = ParsedSdp::parse(sdp);
    let Some(video) = parsed.media.iter_mut().find(|m| m.kind() == "video") else {
        return sdp.to_string();
    };

    video.lines.retain(|line| !line.starts_with("b=AS:"));
    let at = video
        .lines
        .iter()
        .position(|line| line.starts_with("a=ssrc"))
        .unwrap_or(video.lines.len());
    video.lines.insert(at, format!("b=AS:{}", kbps));

    parsed.render()
}

/// Ensure congestion-control and NACK feedback and a minimum bitrate hint
/// for every video codec. Applying it twice yields the same text.
pub fn optimize_latency(sdp: &str) -> String {
    let mut parsed = ParsedSdp::parse(sdp);
    let mut touched = false;

    for section in parsed.media.iter_mut().filter(|m| m.kind() == "video") {
        let codecs: Vec<String> = section
            .rtpmaps()
            .filter(|(_, name)| {
                !AUXILIARY_CODECS
                    .iter()
                    .any(|aux| name.eq_ignore_ascii_case(aux))
            })
            .map(|(pt, _)| pt.to_string())
            .collect();

        for pt in &codecs {
            for feedback in ["transport-cc", "nack"] {
                let wanted = format!("a=rtcp-fb:{} {}", pt, feedback);
                if section.lines.iter().any(|l| *l == wanted) {
                    continue;
                }
                let rtpmap = format!("a=rtpmap:{} ", pt);
                let Some(anchor) = section.lines.iter().position(|l| l.starts_with(&rtpmap)) else {
                    continue;
                };
                section.lines.insert(anchor + 1, wanted);
                touched = true;
            }
        }

        for line in section.lines.iter_mut() {
            if line.starts_with("a=fmtp:") && !line.contains(MIN_BITRATE_KEY) {
                line.push_str(&format!(";{}{}", MIN_BITRATE_KEY, MIN_BITRATE_HINT_KBPS));
                touched = true;
            }
        }
    }

    if touched {
        parsed.render()
    } else {
        sdp.to_string()
    }
}

struct ParsedSdp {
    eol: &'static str,
    trailing_eol: bool,
    session: Vec<String>,
    media: Vec<MediaSection>,
}

struct MediaSection {
    /// `lines[0]` is the m-line
    lines: Vec<String>,
}

impl MediaSection {
    fn kind(&self) -> &str {
        self.lines[0]
            .strip_prefix("m=")
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("")
    }

    /// `(payload type, codec name)` for each `a=rtpmap` line
    fn rtpmaps(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| {
            let rest = line.strip_prefix("a=rtpmap:")?;
            let (pt, encoding) = rest.split_once(' ')?;
            let name = encoding.split('/').next()?;
            Some((pt, name))
        })
    }
}

impl ParsedSdp {
    fn parse(sdp: &str) -> Self {
        let eol = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
        let mut lines: Vec<&str> = sdp.split(eol).collect();
        let trailing_eol = lines.last().is_some_and(|l| l.is_empty());
        if trailing_eol {
            lines.pop();
        }

        let mut session = Vec::new();
        let mut media: Vec<MediaSection> = Vec::new();
        for line in lines {
            if line.starts_with("m=") {
                media.push(MediaSection {
                    lines: vec![line.to_string()],
                });
            } else if let Some(current) = media.last_mut() {
                current.lines.push(line.to_string());
            } else {
                session.push(line.to_string());
            }
        }

        Self {
            eol,
            trailing_eol,
            session,
            media,
        }
    }

    fn render(&self) -> String {
        let all: Vec<&str> = self
            .session
            .iter()
            .chain(self.media.iter().flat_map(|m| m.lines.iter()))
            .map(String::as_str)
            .collect();
        let mut out = all.join(self.eol);
        if self.trailing_eol {
            out.push_str(self.eol);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 102 103\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
a=rtpmap:103 rtx/90000\r\n\
a=fmtp:103 apt=102\r\n\
a=ssrc:1001 cname:carelink\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n";

    fn section<'a>(sdp: &'a str, kind: &str) -> Vec<&'a str> {
        let prefix = format!("m={} ", kind);
        let mut lines = sdp.lines().skip_while(|l| !l.starts_with(&prefix));
        let mut out = Vec::new();
        if let Some(m) = lines.next() {
            out.push(m);
            out.extend(lines.take_while(|l| !l.starts_with("m=")));
        }
        out
    }

    #[test]
    fn test_prefer_h264_moves_payload_to_front() {
        let out = prefer_codec(OFFER, "H264");
        assert!(out.contains("m=video 9 UDP/TLS/RTP/SAVPF 102 96 97 103\r\n"));
        // only the m-line changes
        assert_eq!(out.len(), OFFER.len());
        assert_eq!(section(&out, "audio"), section(OFFER, "audio"));
    }

    #[test]
    fn test_prefer_codec_without_h264_is_byte_identical() {
        let no_h264 = OFFER
            .replace("a=rtpmap:102 H264/90000", "a=rtpmap:102 VP9/90000");
        assert_eq!(prefer_codec(&no_h264, "H264"), no_h264);

        let audio_only = "v=0\nm=audio 9 RTP/AVP 111\na=rtpmap:111 opus/48000/2\n";
        assert_eq!(prefer_codec(audio_only, "H264"), audio_only);
    }

    #[test]
    fn test_bitrate_cap_inserts_single_line_before_ssrc() {
        let out = set_video_bitrate(OFFER, 750);
        let video = section(&out, "video");
        assert_eq!(video.iter().filter(|l| l.starts_with("b=AS:")).count(), 1);

        let b = video.iter().position(|l| *l == "b=AS:750").unwrap();
        assert!(video[b + 1].starts_with("a=ssrc"));
        assert_eq!(section(&out, "audio"), section(OFFER, "audio"));
    }

    #[test]
    fn test_bitrate_cap_without_ssrc_lands_before_audio() {
        let no_ssrc = OFFER.replace("a=ssrc:1001 cname:carelink\r\n", "");
        let out = set_video_bitrate(&no_ssrc, 250);
        assert!(out.contains("a=fmtp:103 apt=102\r\nb=AS:250\r\nm=audio"));
    }

    #[test]
    fn test_bitrate_cap_replaces_existing_line() {
        let once = set_video_bitrate(OFFER, 2500);
        let twice = set_video_bitrate(&once, 250);
        let video = section(&twice, "video");
        assert_eq!(
            video.iter().filter(|l| l.starts_with("b=AS:")).collect::<Vec<_>>(),
            vec![&"b=AS:250"]
        );
    }

    #[test]
    fn test_bitrate_cap_without_video_is_noop() {
        let audio_only = "v=0\r\nm=audio 9 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n";
        assert_eq!(set_video_bitrate(audio_only, 500), audio_only);
    }

    #[test]
    fn test_optimize_latency_adds_feedback_and_hint() {
        let out = optimize_latency(OFFER);
        let video = section(&out, "video");

        for pt in ["96", "102"] {
            assert!(video.contains(&format!("a=rtcp-fb:{} transport-cc", pt).as_str()));
            assert!(video.contains(&format!("a=rtcp-fb:{} nack", pt).as_str()));
        }
        // rtx payloads get no feedback
        assert!(!video.iter().any(|l| l.starts_with("a=rtcp-fb:97")));
        assert_eq!(video.iter().filter(|l| **l == "a=rtcp-fb:96 nack").count(), 1);
        assert!(
            video
                .iter()
                .filter(|l| l.starts_with("a=fmtp:"))
                .all(|l| l.ends_with(";x-google-min-bitrate=100"))
        );
        assert_eq!(section(&out, "audio"), section(OFFER, "audio"));
    }

    #[test]
    fn test_optimize_latency_is_idempotent() {
        let once = optimize_latency(OFFER);
        let twice = optimize_latency(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_composite_order_and_options() {
        let options = SdpTransformOptions {
            prefer_h264: true,
            max_bitrate: Some(2_500_000),
            optimize_latency: true,
        };
        let out = apply_transforms(OFFER, &options);
        assert!(out.contains("m=video 9 UDP/TLS/RTP/SAVPF 102 96 97 103\r\n"));
        assert!(out.contains("b=AS:2500\r\na=ssrc:1001"));
        assert!(out.contains("a=rtcp-fb:102 transport-cc"));
        assert!(out.ends_with("\r\n"));

        let off = SdpTransformOptions {
            prefer_h264: false,
            max_bitrate: None,
            optimize_latency: false,
        };
        assert_eq!(apply_transforms(OFFER, &off), OFFER);
    }
}
