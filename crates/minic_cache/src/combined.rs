//! The combined build artifact and its section markers.
//!
//! A combined artifact is the concatenation of every file's output, each
//! wrapped in markers:
//!
//! ```text
//! ;@@ begin 27 5f0c6e2a9d41b37c08e1f2a3b4c5d6e7 files/file_00001.mini
//! func_1_0:
//!   add r0, r1
//! ;@@ end files/file_00001.mini
//! ```
//!
//! The begin marker carries the exact byte length of the content, so the
//! scanner skips over content without looking inside it and marker-like text
//! in generated code cannot be mistaken for a boundary. It also records the
//! combined hash the content was built for; a section is only current while
//! that hash matches the file's combined hash in the build at hand.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use minic_common::ContentHash;

const BEGIN_MARKER: &[u8] = b";@@ begin ";
const END_MARKER: &[u8] = b";@@ end ";

/// Rendering of combined artifacts.
pub struct CombinedArtifact;

impl CombinedArtifact {
    /// Renders sections in the given order.
    pub fn render<'a, I>(sections: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (&'a Path, ContentHash, &'a [u8])>,
    {
        let mut out = Vec::new();
        for (path, hash, content) in sections {
            Self::write_section(&mut out, path, hash, content);
        }
        out
    }

    /// Appends one marked section.
    pub fn write_section(out: &mut Vec<u8>, path: &Path, hash: ContentHash, content: &[u8]) {
        let name = path.to_string_lossy();
        out.extend_from_slice(BEGIN_MARKER);
        out.extend_from_slice(format!("{} {hash} {name}\n", content.len()).as_bytes());
        out.extend_from_slice(content);
        out.extend_from_slice(END_MARKER);
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
    }
}

/// Reasons a combined artifact cannot be indexed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    /// A begin marker line could not be parsed.
    #[error("malformed begin marker at byte {offset}")]
    MalformedBegin {
        /// Offset of the marker.
        offset: usize,
    },

    /// A section's declared length runs past the end of the artifact.
    #[error("section for {path} is truncated")]
    Truncated {
        /// The section's path.
        path: PathBuf,
    },

    /// The bytes after a section's content are not its end marker.
    #[error("missing end marker for {path}")]
    MissingEnd {
        /// The section's path.
        path: PathBuf,
    },

    /// An end marker appeared outside any section.
    #[error("stray end marker at byte {offset}")]
    StrayEnd {
        /// Offset of the marker.
        offset: usize,
    },

    /// Two sections carry the same path.
    #[error("duplicate section for {path}")]
    Duplicate {
        /// The repeated path.
        path: PathBuf,
    },
}

/// Location of one file's section inside a combined artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// The file the section belongs to.
    pub path: PathBuf,
    /// Combined hash the content was built for.
    pub hash: ContentHash,
    /// The whole section, markers included.
    pub span: Range<usize>,
    /// The content between the markers.
    pub content: Range<usize>,
}

/// Index of the sections in a combined artifact, built in one pass.
#[derive(Debug, Default)]
pub struct SectionIndex {
    sections: Vec<Section>,
    by_path: HashMap<PathBuf, usize>,
}

impl SectionIndex {
    /// Scans an artifact once, recording every section.
    ///
    /// Bytes outside sections are allowed and ignored, as long as they do not
    /// start with a marker.
    pub fn scan(bytes: &[u8]) -> Result<Self, MarkerError> {
        let mut index = Self::default();
        let mut pos = 0;

        while pos < bytes.len() {
            let rest = &bytes[pos..];
            if rest.starts_with(BEGIN_MARKER) {
                let section = parse_section(bytes, pos)?;
                pos = section.span.end;
                if index.by_path.contains_key(&section.path) {
                    return Err(MarkerError::Duplicate { path: section.path });
                }
                index
                    .by_path
                    .insert(section.path.clone(), index.sections.len());
                index.sections.push(section);
            } else if rest.starts_with(END_MARKER) {
                return Err(MarkerError::StrayEnd { offset: pos });
            } else {
                pos = match rest.iter().position(|&b| b == b'\n') {
                    Some(nl) => pos + nl + 1,
                    None => bytes.len(),
                };
            }
        }

        Ok(index)
    }

    /// Sections in artifact order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Looks up the section for a path.
    pub fn get(&self, path: &Path) -> Option<&Section> {
        self.by_path.get(path).map(|&i| &self.sections[i])
    }

    /// Returns `true` if the sections appear exactly in `layout` order.
    pub fn matches_layout<P: AsRef<Path>>(&self, layout: &[P]) -> bool {
        self.sections.len() == layout.len()
            && self
                .sections
                .iter()
                .zip(layout)
                .all(|(section, path)| section.path == path.as_ref())
    }
}

fn parse_section(bytes: &[u8], start: usize) -> Result<Section, MarkerError> {
    let malformed = MarkerError::MalformedBegin { offset: start };
    let header_start = start + BEGIN_MARKER.len();
    let header_len = bytes[header_start..]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| malformed.clone())?;
    let header = std::str::from_utf8(&bytes[header_start..header_start + header_len])
        .map_err(|_| malformed.clone())?;
    let mut fields = header.splitn(3, ' ');
    let (Some(len), Some(hash), Some(name)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(malformed);
    };
    let len: usize = len.parse().map_err(|_| malformed.clone())?;
    let hash = ContentHash::from_hex(hash).ok_or_else(|| malformed.clone())?;
    if name.is_empty() {
        return Err(malformed);
    }
    let path = PathBuf::from(name);

    let content_start = header_start + header_len + 1;
    let content_end = content_start
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| MarkerError::Truncated { path: path.clone() })?;

    let mut end_marker = Vec::with_capacity(END_MARKER.len() + name.len() + 1);
    end_marker.extend_from_slice(END_MARKER);
    end_marker.extend_from_slice(name.as_bytes());
    end_marker.push(b'\n');
    if !bytes[content_end..].starts_with(&end_marker) {
        return Err(MarkerError::MissingEnd { path });
    }

    Ok(Section {
        path,
        hash,
        span: start..content_end + end_marker.len(),
        content: content_start..content_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(seed: &str) -> ContentHash {
        ContentHash::from_bytes(seed.as_bytes())
    }

    fn sample() -> Vec<u8> {
        CombinedArtifact::render([
            (Path::new("c.mini"), h("c"), b"c:\n  ret\n".as_slice()),
            (Path::new("b.mini"), h("b"), b"b:\n  call c\n  ret\n".as_slice()),
            (Path::new("a.mini"), h("a"), b"".as_slice()),
        ])
    }

    #[test]
    fn render_format() {
        let out = CombinedArtifact::render([(Path::new("a.mini"), h("a"), b"a:\n".as_slice())]);
        let expected = format!(";@@ begin 3 {} a.mini\na:\n;@@ end a.mini\n", h("a"));
        assert_eq!(out, expected.as_bytes());
    }

    #[test]
    fn scan_records_section_hashes() {
        let index = SectionIndex::scan(&sample()).unwrap();
        assert_eq!(index.get(Path::new("b.mini")).unwrap().hash, h("b"));
        assert_eq!(index.get(Path::new("a.mini")).unwrap().hash, h("a"));
    }

    #[test]
    fn paths_with_spaces_survive() {
        let bytes =
            CombinedArtifact::render([(Path::new("my dir/a.mini"), h("a"), b"x".as_slice())]);
        let index = SectionIndex::scan(&bytes).unwrap();
        assert!(index.get(Path::new("my dir/a.mini")).is_some());
    }

    #[test]
    fn scan_finds_sections_in_order() {
        let bytes = sample();
        let index = SectionIndex::scan(&bytes).unwrap();
        let paths: Vec<_> = index.sections().iter().map(|s| s.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("c.mini"),
                PathBuf::from("b.mini"),
                PathBuf::from("a.mini")
            ]
        );
        let b = index.get(Path::new("b.mini")).unwrap();
        assert_eq!(&bytes[b.content.clone()], b"b:\n  call c\n  ret\n");
        assert!(index.get(Path::new("a.mini")).unwrap().content.is_empty());
    }

    #[test]
    fn content_that_looks_like_markers_is_skipped() {
        let tricky = b";@@ end a.mini\n;@@ begin 999 x.mini\n";
        let bytes =
            CombinedArtifact::render([(Path::new("a.mini"), h("a"), tricky.as_slice())]);
        let index = SectionIndex::scan(&bytes).unwrap();
        assert_eq!(index.sections().len(), 1);
        let a = index.get(Path::new("a.mini")).unwrap();
        assert_eq!(&bytes[a.content.clone()], tricky);
    }

    #[test]
    fn unmarked_lines_are_tolerated() {
        let mut bytes = b"; generated by minic\n".to_vec();
        bytes.extend(sample());
        bytes.extend_from_slice(b"; trailer");
        let index = SectionIndex::scan(&bytes).unwrap();
        assert_eq!(index.sections().len(), 3);
    }

    #[test]
    fn truncated_section_is_rejected() {
        let mut bytes = sample();
        bytes.truncate(bytes.len() - 10);
        assert!(SectionIndex::scan(&bytes).is_err());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let bytes = format!(";@@ begin 2 {} a.mini\nabc\n;@@ end a.mini\n", h("a"));
        assert_eq!(
            SectionIndex::scan(bytes.as_bytes()).unwrap_err(),
            MarkerError::MissingEnd {
                path: PathBuf::from("a.mini")
            }
        );
    }

    #[test]
    fn bad_header_is_rejected() {
        let bytes = b";@@ begin lots a.mini\n;@@ end a.mini\n";
        assert_eq!(
            SectionIndex::scan(bytes).unwrap_err(),
            MarkerError::MalformedBegin { offset: 0 }
        );
    }

    #[test]
    fn bad_hash_is_rejected() {
        let bytes = b";@@ begin 0 not-a-hash a.mini\n;@@ end a.mini\n";
        assert_eq!(
            SectionIndex::scan(bytes).unwrap_err(),
            MarkerError::MalformedBegin { offset: 0 }
        );
    }

    #[test]
    fn stray_end_is_rejected() {
        let bytes = b";@@ end a.mini\n";
        assert_eq!(
            SectionIndex::scan(bytes).unwrap_err(),
            MarkerError::StrayEnd { offset: 0 }
        );
    }

    #[test]
    fn duplicate_path_is_rejected() {
        let bytes = CombinedArtifact::render([
            (Path::new("a.mini"), h("1"), b"1\n".as_slice()),
            (Path::new("a.mini"), h("2"), b"2\n".as_slice()),
        ]);
        assert!(matches!(
            SectionIndex::scan(&bytes),
            Err(MarkerError::Duplicate { .. })
        ));
    }

    #[test]
    fn layout_check() {
        let index = SectionIndex::scan(&sample()).unwrap();
        let layout = ["c.mini", "b.mini", "a.mini"].map(PathBuf::from);
        assert!(index.matches_layout(&layout));
        let reordered = ["a.mini", "b.mini", "c.mini"].map(PathBuf::from);
        assert!(!index.matches_layout(&reordered));
        assert!(!index.matches_layout(&layout[..2]));
    }
}
