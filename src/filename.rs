use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result, anyhow};
use regex::Regex;

use crate::job::{FilenamePattern, Job};

/// Extracted field name to raw string value.
pub type FilenameValues = BTreeMap<String, String>;

pub trait FilenameExtractor {
    /// Returns `None` when the file name does not match.
    fn extract(&self, file_name: &str) -> Option<FilenameValues>;
}

#[derive(Debug, Clone)]
pub struct PatternExtractor {
    regex: Regex,
}

impl PatternExtractor {
    pub fn compile(pattern: &FilenamePattern) -> Result<Self> {
        let regex = match pattern {
            FilenamePattern::Template(template) => template_to_regex(template)?,
            FilenamePattern::Regex(raw) => {
                Regex::new(raw).with_context(|| format!("Compiling filename regex '{raw}'"))?
            }
        };
        Ok(Self { regex })
    }

    pub fn has_capture(&self, name: &str) -> bool {
        self.regex.capture_names().flatten().any(|n| n == name)
    }
}

impl FilenameExtractor for PatternExtractor {
    fn extract(&self, file_name: &str) -> Option<FilenameValues> {
        let captures = self.regex.captures(file_name)?;
        let values = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();
        Some(values)
    }
}

fn template_to_regex(template: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    let mut rest = template;
    while let Some(open) = rest.find('[') {
        pattern.push_str(&regex::escape(&rest[..open]));
        let after = &rest[open + 1..];
        let close = after
            .find(']')
            .ok_or_else(|| anyhow!("Unclosed '[' in filename template '{template}'"))?;
        let name = &after[..close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(anyhow!(
                "Invalid placeholder '[{name}]' in filename template '{template}'"
            ));
        }
        pattern.push_str(&format!("(?P<{name}>.+?)"));
        rest = &after[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');
    Regex::new(&pattern).with_context(|| format!("Compiling filename template '{template}'"))
}

/// Runs a job's filename extraction against the final component of `path`.
///
/// Returns `Ok(None)` when the job has no extraction configured. A pattern
/// that does not match is an error when `mandatory`, otherwise `Ok(None)`.
pub fn extract_for_job(job: &Job, path: &Path, mandatory: bool) -> Result<Option<FilenameValues>> {
    let Some(extraction) = &job.filename_extraction else {
        return Ok(None);
    };
    let extractor = PatternExtractor::compile(&extraction.pattern)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Cannot read a file name from {path:?}"))?;
    match extractor.extract(file_name) {
        Some(values) => Ok(Some(values)),
        None if mandatory => Err(anyhow!(
            "Could not extract values from filename '{file_name}' using pattern '{}'",
            extraction.pattern.as_str()
        )),
        None => Ok(None),
    }
}
