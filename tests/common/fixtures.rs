//! Catalog, article and configuration fixtures

use kumo::yenc::{self, PartInfo};
use kumo::{Config, DownloadConfig, ServerConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Newsgroup every fixture posts to
pub const TEST_GROUP: &str = "alt.binaries.test";

/// One `<file>` of a generated catalog
pub struct NzbFile {
    /// Subject; the quoted file name drives repair-data partitioning
    pub subject: String,
    /// (message id, declared bytes) in segment order
    pub segments: Vec<(String, u64)>,
}

impl NzbFile {
    /// Subject in the usual `"name" yEnc (1/n)` shape
    pub fn new(name: &str, segments: Vec<(String, u64)>) -> Self {
        Self {
            subject: format!("\"{}\" yEnc (1/{})", name, segments.len()),
            segments,
        }
    }
}

/// Render a catalog document
pub fn nzb_xml(files: &[NzbFile]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<!DOCTYPE nzb PUBLIC "-//newzBin//DTD NZB 1.0//EN" "http://www.newzbin.com/DTD/nzb/nzb-1.0.dtd">
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
"#,
    );
    for file in files {
        xml.push_str(&format!(
            "  <file poster=\"tester@example.com\" date=\"1700000000\" subject=\"{}\">\n",
            file.subject.replace('"', "&quot;")
        ));
        xml.push_str(&format!(
            "    <groups>\n      <group>{}</group>\n    </groups>\n    <segments>\n",
            TEST_GROUP
        ));
        for (number, (id, bytes)) in file.segments.iter().enumerate() {
            xml.push_str(&format!(
                "      <segment bytes=\"{}\" number=\"{}\">{}</segment>\n",
                bytes,
                number + 1,
                id
            ));
        }
        xml.push_str("    </segments>\n  </file>\n");
    }
    xml.push_str("</nzb>\n");
    xml
}

/// Write a catalog as `<dir>/<job>.nzb`
pub fn write_nzb(dir: &Path, job: &str, files: &[NzbFile]) -> PathBuf {
    let path = dir.join(format!("{}.nzb", job));
    std::fs::write(&path, nzb_xml(files)).unwrap();
    path
}

/// Deterministic payload that exercises every yEnc escape
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Split `data` into `parts` yEnc articles; returns (message id, body) pairs
pub fn split_articles(
    data: &[u8],
    name: &str,
    parts: usize,
    id_prefix: &str,
) -> Vec<(String, Vec<u8>)> {
    let chunk = data.len().div_ceil(parts);
    data.chunks(chunk)
        .enumerate()
        .map(|(i, piece)| {
            let info = PartInfo {
                part: i as u32 + 1,
                total: parts as u32,
                begin: (i * chunk) as u64 + 1,
                file_size: data.len() as u64,
            };
            (
                format!("{}.{}@test.local", id_prefix, i + 1),
                yenc::encode_part(piece, name, info).unwrap(),
            )
        })
        .collect()
}

/// Single-part article body
pub fn single_article(data: &[u8], name: &str) -> Vec<u8> {
    yenc::encode(data, name).unwrap()
}

/// Configuration pointing at a local mock server, with directories under `root`
pub fn test_config(port: u16, connections: usize, root: &Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            tls: false,
            username: None,
            password: None,
            connections,
            command_timeout: Duration::from_secs(5),
        },
        download: DownloadConfig {
            download_dir: root.join("downloads"),
            temp_dir: root.join("temp"),
            ..Default::default()
        },
        quiet: true,
        debug: false,
        debug_file: None,
    }
}
