//! SDP codec preference rewriting
//!
//! The offered codec priority is the order of payload type ids on the
//! `m=video` line. Moving the ids of one codec to the front makes the remote
//! negotiator pick it when it supports it:
//!
//! ```text
//! a=rtpmap:96 VP8/90000
//! a=rtpmap:102 h264/90000
//! m=video 9 UDP/TLS/RTP/SAVPF 96 97 102 103
//!                      becomes
//! m=video 9 UDP/TLS/RTP/SAVPF 102 96 97 103
//! ```

use crate::error::{Error, Result};

const RTPMAP_PREFIX: &str = "a=rtpmap:";
const VIDEO_PREFIX: &str = "m=video";

/// Fields of an `m=` line before the format list: media, port, proto
const MEDIA_LINE_FIXED_FIELDS: usize = 3;

/// Reorder every video format list so ids mapped to `codec_name` come first
///
/// Codec names are matched case-sensitively against the token before the
/// clock rate (`a=rtpmap:<id> <name>/<rate>`). Both groups keep their
/// original relative order; every other byte of the document is preserved.
pub fn prefer_codec(sdp: &str, codec_name: &str) -> Result<String> {
    let lines: Vec<&str> = sdp.split_inclusive('\n').collect();

    if !lines.iter().any(|l| is_video_line(l)) {
        return Err(Error::NoVideoSection);
    }

    let preferred: Vec<&str> = lines
        .iter()
        .filter_map(|l| parse_rtpmap(l))
        .filter(|(_, name)| *name == codec_name)
        .map(|(id, _)| id)
        .collect();

    if preferred.is_empty() {
        return Ok(sdp.to_string());
    }

    let mut out = String::with_capacity(sdp.len());
    for line in lines {
        if is_video_line(line) {
            out.push_str(&reorder_media_line(line, &preferred));
        } else {
            out.push_str(line);
        }
    }
    Ok(out)
}

fn is_video_line(line: &str) -> bool {
    line.strip_prefix(VIDEO_PREFIX)
        .map(|rest| rest.starts_with(' '))
        .unwrap_or(false)
}

/// Split a line into content and its terminator (`\r\n`, `\n`, or nothing)
fn split_terminator(line: &str) -> (&str, &str) {
    let content = line.trim_end_matches(['\r', '\n']);
    (content, &line[content.len()..])
}

/// `a=rtpmap:102 h264/90000` -> `("102", "h264")`
fn parse_rtpmap(line: &str) -> Option<(&str, &str)> {
    let (content, _) = split_terminator(line);
    let rest = content.strip_prefix(RTPMAP_PREFIX)?;
    let (id, encoding) = rest.split_once(' ')?;
    let (name, _) = encoding.split_once('/')?;
    Some((id, name))
}

fn reorder_media_line(line: &str, preferred: &[&str]) -> String {
    let (content, terminator) = split_terminator(line);
    let fields: Vec<&str> = content.split(' ').collect();

    if fields.len() <= MEDIA_LINE_FIXED_FIELDS {
        return line.to_string();
    }

    let (fixed, formats) = fields.split_at(MEDIA_LINE_FIXED_FIELDS);
    let (mut ordered, rest): (Vec<&str>, Vec<&str>) =
        formats.iter().copied().partition(|id| preferred.contains(id));
    ordered.extend(rest);

    let mut out = fixed.join(" ");
    for id in ordered {
        out.push(' ');
        out.push_str(id);
    }
    out.push_str(terminator);
    out
}
