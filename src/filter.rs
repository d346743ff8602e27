//! Subject filtering and repair-data partitioning

use crate::error::{Error, Result};
use crate::nzb::Nzb;
use regex::Regex;

/// Regex-based subject filter
#[derive(Debug, Clone, Default)]
pub struct Filter {
    regexps: Vec<Regex>,
}

impl Filter {
    /// Compile a filter from patterns; an invalid pattern is a configuration error
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let regexps = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| Error::Config {
                    message: format!("invalid filter {:?}: {}", p.as_ref(), e),
                    key: Some("filters".to_string()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { regexps })
    }

    /// Whether any patterns are configured
    pub fn has_filters(&self) -> bool {
        !self.regexps.is_empty()
    }

    /// Whether any pattern matches `subject`
    pub fn matches(&self, subject: &str) -> bool {
        match self.regexps.iter().find(|re| re.is_match(subject)) {
            Some(re) => {
                tracing::debug!(regex = %re, subject = %subject, "Filter matched");
                true
            }
            None => false,
        }
    }

    /// Drop every entry whose subject matches
    pub fn exclude(&self, nzb: Nzb) -> Nzb {
        if !self.has_filters() {
            return nzb;
        }
        Nzb {
            files: nzb
                .files
                .into_iter()
                .filter(|file| !self.matches(&file.subject))
                .collect(),
        }
    }
}

/// Split a catalog into (entries without `extension`, entries with it)
///
/// The comparison is case-insensitive and the leading dot is optional.
pub fn partition(nzb: Nzb, extension: &str) -> (Nzb, Nzb) {
    let wanted = extension.trim_start_matches('.');
    let (matching, primary): (Vec<_>, Vec<_>) = nzb.files.into_iter().partition(|file| {
        file.extension()
            .map(|ext| ext.trim_start_matches('.').eq_ignore_ascii_case(wanted))
            .unwrap_or(false)
    });
    for file in &matching {
        tracing::debug!(extension = %extension, subject = %file.subject, "Deferred to repair pass");
    }
    (Nzb { files: primary }, Nzb { files: matching })
}
