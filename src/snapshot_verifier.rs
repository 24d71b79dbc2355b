use anyhow::{Context, Result};
use glob::glob;
use graffiti_sync::data_loader::parse_snapshot;
use graffiti_sync::ServiceRequestRecord;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    DuplicateId(i64),
    MissingRequested(i64),
    ClosedBeforeRequested(i64),
    MissingTimeToClose(i64),
    NegativeTimeToClose(i64),
    BadZipcode(i64, String),
    MissingArea(i64),
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Issue::DuplicateId(id) => write!(f, "cartodb_id {} appears more than once", id),
            Issue::MissingRequested(id) => write!(f, "{}: no requested_datetime", id),
            Issue::ClosedBeforeRequested(id) => write!(f, "{}: closed before it was requested", id),
            Issue::MissingTimeToClose(id) => write!(f, "{}: time_to_close not computed", id),
            Issue::NegativeTimeToClose(id) => write!(f, "{}: negative time_to_close", id),
            Issue::BadZipcode(id, zip) => write!(f, "{}: zipcode {:?} is not five digits", id, zip),
            Issue::MissingArea(id) => write!(f, "{}: no area label", id),
        }
    }
}

pub struct SnapshotVerifier {
    zip_pattern: Regex,
}

impl SnapshotVerifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            zip_pattern: Regex::new(r"^\d{5}$")?,
        })
    }

    pub fn check_records(&self, records: &[ServiceRequestRecord]) -> Vec<Issue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::with_capacity(records.len());

        for r in records {
            let id = r.cartodb_id;
            if !seen.insert(id) {
                issues.push(Issue::DuplicateId(id));
            }

            match r.requested_datetime {
                None => issues.push(Issue::MissingRequested(id)),
                Some(requested) => {
                    if r.closed_datetime.is_some_and(|closed| closed < requested) {
                        issues.push(Issue::ClosedBeforeRequested(id));
                    }
                    match r.time_to_close {
                        None => issues.push(Issue::MissingTimeToClose(id)),
                        Some(days) if days < 0 => issues.push(Issue::NegativeTimeToClose(id)),
                        Some(_) => {}
                    }
                }
            }

            if let Some(zip) = r.zipcode.as_deref() {
                if !self.zip_pattern.is_match(zip) {
                    issues.push(Issue::BadZipcode(id, zip.to_string()));
                }
            }

            if r.area.is_none() {
                issues.push(Issue::MissingArea(id));
            }
        }

        issues
    }

    pub fn check_file(&self, path: &Path) -> Result<Vec<Issue>> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let records = parse_snapshot(bytes).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(self.check_records(&records))
    }
}

/// Audit every snapshot matching `pattern`. Fails when any issue is found.
pub fn verify_snapshots(pattern: &str) -> Result<()> {
    println!("\n🔍 Snapshot Verification");
    println!("{}", "=".repeat(60));

    let files: Vec<PathBuf> = glob(pattern)?.filter_map(Result::ok).collect();
    if files.is_empty() {
        println!("No files match {}", pattern);
        return Ok(());
    }
    println!("📁 Checking {} files matching {}", files.len(), pattern);

    let verifier = SnapshotVerifier::new()?;
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let results: Vec<(PathBuf, Result<Vec<Issue>>)> = files
        .par_iter()
        .map(|file| {
            let result = verifier.check_file(file);
            pb.inc(1);
            (file.clone(), result)
        })
        .collect();
    pb.finish_with_message("done");

    let mut total_issues = 0;
    for (file, result) in results {
        println!("\n  Verifying: {}", file.display());
        match result {
            Ok(issues) if issues.is_empty() => println!("    ✅ No issues found"),
            Ok(issues) => {
                println!("    ❌ {} issues", issues.len());
                for issue in issues.iter().take(20) {
                    println!("      - {}", issue);
                }
                if issues.len() > 20 {
                    println!("      ... and {} more", issues.len() - 20);
                }
                total_issues += issues.len();
            }
            Err(e) => {
                println!("    ❌ {:#}", e);
                total_issues += 1;
            }
        }
    }

    println!("\n{}", "=".repeat(60));
    if total_issues > 0 {
        anyhow::bail!("Verification found {} issues", total_issues);
    }
    println!("✅ All snapshots passed verification");
    Ok(())
}
