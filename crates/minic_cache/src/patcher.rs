//! Surgical patching of a previous combined artifact.
//!
//! Only stale sections are rewritten; everything else is copied byte for
//! byte. A section is stale when its recorded combined hash or its content
//! differs from the current build, which covers files recompiled in this
//! build as well as files whose cached artifact moved on in a build of a
//! different root set. Patching is purely a latency optimization, so any
//! doubt about the previous artifact declines the patch and the caller
//! regenerates the artifact in full.

use std::path::Path;

use minic_common::ContentHash;
use tracing::debug;

use crate::combined::{CombinedArtifact, MarkerError, SectionIndex};

/// Why a patch was declined. Never surfaced to callers.
#[derive(Debug, thiserror::Error)]
enum PatchError {
    #[error("no previous combined artifact")]
    NoPrevious,

    #[error(transparent)]
    Markers(#[from] MarkerError),

    #[error("previous artifact has a different file layout")]
    LayoutChanged,
}

/// Splices current file sections into a previous combined artifact.
pub struct SurgicalPatcher;

impl SurgicalPatcher {
    /// Returns the patched artifact, or `None` when a full regeneration is needed.
    ///
    /// `current` lists every section of the new artifact in order, as
    /// `(path, combined hash, content)`. The patch is declined when there is
    /// no previous artifact, its markers are malformed, or its sections are
    /// not exactly the paths of `current` in the same order (a file was
    /// added, removed or reordered). A successful patch is byte-identical to
    /// [`CombinedArtifact::render`] over `current`, apart from unmarked bytes
    /// the previous artifact carried between sections.
    pub fn try_patch(
        previous: Option<&[u8]>,
        current: &[(&Path, ContentHash, &[u8])],
    ) -> Option<Vec<u8>> {
        match Self::patch(previous, current) {
            Ok(patched) => Some(patched),
            Err(reason) => {
                debug!(%reason, "surgical patch declined");
                None
            }
        }
    }

    fn patch(
        previous: Option<&[u8]>,
        current: &[(&Path, ContentHash, &[u8])],
    ) -> Result<Vec<u8>, PatchError> {
        let previous = previous.ok_or(PatchError::NoPrevious)?;
        let index = SectionIndex::scan(previous)?;

        let layout: Vec<&Path> = current.iter().map(|&(path, _, _)| path).collect();
        if !index.matches_layout(&layout) {
            return Err(PatchError::LayoutChanged);
        }
        let sections = index.sections();

        let mut out = Vec::with_capacity(previous.len());
        let mut cursor = 0;
        let mut spliced = 0;
        for (section, &(path, hash, content)) in sections.iter().zip(current) {
            if section.hash == hash && previous[section.content.clone()] == *content {
                continue;
            }
            out.extend_from_slice(&previous[cursor..section.span.start]);
            CombinedArtifact::write_section(&mut out, path, hash, content);
            cursor = section.span.end;
            spliced += 1;
        }
        out.extend_from_slice(&previous[cursor..]);
        debug!(spliced, sections = sections.len(), "patched combined artifact");
        Ok(out)
    }
}
