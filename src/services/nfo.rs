//! Kodi-style musicvideo NFO sidecar writer

use std::path::Path;

use anyhow::{Context, Result};

use super::ffmpeg::MediaInfo;
use crate::media::naming::TrackMetadata;

/// Write a `<musicvideo>` NFO next to the output file.
pub fn write_nfo(
    metadata: &TrackMetadata,
    nfo_path: &Path,
    media_info: Option<&MediaInfo>,
) -> Result<()> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n");
    xml.push_str("<musicvideo>\n");

    push_tag(&mut xml, "title", &metadata.title);
    push_tag(&mut xml, "artist", &metadata.artist);
    push_tag(&mut xml, "album", &metadata.album);
    if let Some(year) = metadata.year {
        push_tag(&mut xml, "year", &year.to_string());
    }
    if metadata.track > 0 {
        push_tag(&mut xml, "track", &metadata.track.to_string());
    }
    push_tag(&mut xml, "genre", &metadata.genre);
    if metadata.duration_secs > 0.0 {
        let minutes = (metadata.duration_secs / 60.0).round() as i64;
        push_tag(&mut xml, "runtime", &minutes.to_string());
    }

    if let Some(info) = media_info {
        xml.push_str("  <fileinfo>\n    <streamdetails>\n");
        if let Some(codec) = &info.video_codec {
            xml.push_str("      <video>\n");
            push_indented_tag(&mut xml, "codec", codec);
            if let Some(width) = info.width {
                push_indented_tag(&mut xml, "width", &width.to_string());
            }
            if let Some(height) = info.height {
                push_indented_tag(&mut xml, "height", &height.to_string());
            }
            if let Some(duration) = info.duration_secs {
                push_indented_tag(&mut xml, "durationinseconds", &format!("{}", duration as i64));
            }
            xml.push_str("      </video>\n");
        }
        if let Some(codec) = &info.audio_codec {
            xml.push_str("      <audio>\n");
            push_indented_tag(&mut xml, "codec", codec);
            if let Some(rate) = info.sample_rate {
                push_indented_tag(&mut xml, "samplingrate", &rate.to_string());
            }
            xml.push_str("      </audio>\n");
        }
        xml.push_str("    </streamdetails>\n  </fileinfo>\n");
    }

    xml.push_str("</musicvideo>\n");

    std::fs::write(nfo_path, xml)
        .with_context(|| format!("failed to write {}", nfo_path.display()))?;
    Ok(())
}

fn push_tag(xml: &mut String, tag: &str, value: &str) {
    if !value.is_empty() {
        xml.push_str(&format!("  <{tag}>{}</{tag}>\n", escape(value)));
    }
}

fn push_indented_tag(xml: &mut String, tag: &str, value: &str) {
    xml.push_str(&format!("        <{tag}>{}</{tag}>\n", escape(value)));
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_nfo_basic() {
        let dir = tempfile::tempdir().unwrap();
        let nfo_path = dir.path().join("song.nfo");
        let meta = TrackMetadata {
            title: "Time & Money".into(),
            artist: "Pink Floyd".into(),
            album: "The Dark Side of the Moon".into(),
            year: Some(1973),
            track: 4,
            duration_secs: 413.0,
            ..Default::default()
        };

        write_nfo(&meta, &nfo_path, None).unwrap();
        let body = std::fs::read_to_string(&nfo_path).unwrap();
        assert!(body.contains("<musicvideo>"));
        assert!(body.contains("<title>Time &amp; Money</title>"));
        assert!(body.contains("<year>1973</year>"));
        assert!(body.contains("<runtime>7</runtime>"));
        assert!(!body.contains("<genre>"));
    }

    #[test]
    fn test_write_nfo_with_stream_details() {
        let dir = tempfile::tempdir().unwrap();
        let nfo_path = dir.path().join("song.nfo");
        let meta = TrackMetadata {
            title: "Song".into(),
            ..Default::default()
        };
        let info = MediaInfo {
            container: "matroska".into(),
            duration_secs: Some(200.0),
            video_codec: Some("h264".into()),
            width: Some(1920),
            height: Some(1080),
            audio_codec: Some("flac".into()),
            sample_rate: Some(44100),
        };

        write_nfo(&meta, &nfo_path, Some(&info)).unwrap();
        let body = std::fs::read_to_string(&nfo_path).unwrap();
        assert!(body.contains("<codec>h264</codec>"));
        assert!(body.contains("<height>1080</height>"));
        assert!(body.contains("<samplingrate>44100</samplingrate>"));
    }
}
