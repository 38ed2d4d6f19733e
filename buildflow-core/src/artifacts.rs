//! Artifact management: pattern-based collection from platform output
//! directories, archive creation, and retention cleanup.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ArtifactsConfig, RetentionConfig, RetentionType};
use crate::expand::expand;
use crate::registry::NodeRegistry;
use crate::types::NodeKind;

/// One collected artifact file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub platform: String,
    /// The platform's artifact directory.
    pub root: PathBuf,
    pub path: PathBuf,
}

/// Scan every platform node's artifact directory for files matching its
/// declared patterns. Missing directories are skipped with a warning.
pub fn collect_artifacts(registry: &NodeRegistry) -> Result<Vec<Artifact>> {
    let mut collected = Vec::new();
    for node in registry.all_nodes() {
        if node.kind != NodeKind::Platform {
            continue;
        }
        let Some(dir) = node.artifact_dir.as_deref() else {
            continue;
        };
        let root = PathBuf::from(dir);
        if !root.is_dir() {
            warn!(platform = %node.name, dir, "artifact directory does not exist");
            continue;
        }
        let matcher = build_globset(&node.artifact_patterns)?;
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or_else(|_| entry.path());
            if matcher.is_match(relative) {
                collected.push(Artifact {
                    platform: node.name.clone(),
                    root: root.clone(),
                    path: entry.path().to_path_buf(),
                });
            }
        }
    }
    debug!(count = collected.len(), "artifacts collected");
    Ok(collected)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    if patterns.is_empty() {
        builder.add(Glob::new("**/*")?);
    }
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("bad artifact pattern: {pattern}"))?);
    }
    Ok(builder.build()?)
}

/// Create a `.tar.gz` archive of the collected artifacts under
/// `archives_dir`. The archive name comes from the configured template with
/// `${target}` and `${timestamp}` expanded. Returns the archive path, or
/// `None` when archiving is disabled or nothing was collected.
pub fn archive_artifacts(
    config: &ArtifactsConfig,
    target: &str,
    artifacts: &[Artifact],
    archives_dir: &Path,
) -> Result<Option<PathBuf>> {
    if !config.archive_enabled || artifacts.is_empty() {
        return Ok(None);
    }

    let format = config.archive_format.as_deref().unwrap_or("tar.gz");
    if format != "tar.gz" {
        return Err(anyhow!("unsupported archive format: {format}"));
    }

    let template = config
        .archive_name_template
        .as_deref()
        .unwrap_or("${target}_${timestamp}");
    let mut vars = BTreeMap::new();
    vars.insert("target".to_string(), target.to_string());
    vars.insert(
        "timestamp".to_string(),
        Utc::now().format("%Y%m%d_%H%M%S").to_string(),
    );
    let name = expand(template, &vars);

    std::fs::create_dir_all(archives_dir)
        .with_context(|| format!("failed to create {}", archives_dir.display()))?;
    let archive_path = archives_dir.join(format!("{name}.{format}"));

    let file = std::fs::File::create(&archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for artifact in artifacts {
        let relative = artifact
            .path
            .strip_prefix(&artifact.root)
            .unwrap_or(&artifact.path);
        let entry_name = Path::new(&artifact.platform).join(relative);
        builder
            .append_path_with_name(&artifact.path, &entry_name)
            .with_context(|| format!("failed to archive {}", artifact.path.display()))?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    info!(archive = %archive_path.display(), files = artifacts.len(), "archive written");
    Ok(Some(archive_path))
}

// ─── Retention ────────────────────────────────────────────────

/// Decide which archives to delete under the configured policy. Pure
/// planning over `(path, mtime)` pairs so policies stay testable without
/// touching the filesystem.
pub fn plan_cleanup(
    retention: &RetentionConfig,
    files: &[(PathBuf, DateTime<Utc>)],
    now: DateTime<Utc>,
) -> Vec<PathBuf> {
    let age_days = |t: DateTime<Utc>| (now - t).num_days().max(0) as u32;

    match retention.policy {
        RetentionType::Simple => {
            let Some(simple) = &retention.simple else {
                return Vec::new();
            };
            files
                .iter()
                .filter(|(_, t)| age_days(*t) > simple.days)
                .map(|(p, _)| p.clone())
                .collect()
        }

        RetentionType::Hierarchical => {
            let Some(policy) = &retention.hierarchical else {
                return Vec::new();
            };
            let mut intervals = policy.intervals.clone();
            intervals.sort_by_key(|i| i.older_than_days);

            // Survivor per (interval, window): the newest file wins.
            let mut survivors: BTreeMap<(u32, i64), (PathBuf, DateTime<Utc>)> = BTreeMap::new();
            let mut candidates: Vec<(PathBuf, DateTime<Utc>, (u32, i64))> = Vec::new();

            for (path, t) in files {
                let age = age_days(*t);
                let Some(interval) = intervals
                    .iter()
                    .rev()
                    .find(|i| age > i.older_than_days)
                else {
                    continue; // young enough to keep unconditionally
                };
                let window = t.timestamp() / (i64::from(interval.keep_one_per_days.max(1)) * 86_400);
                let slot = (interval.older_than_days, window);
                candidates.push((path.clone(), *t, slot));
                match survivors.get(&slot) {
                    Some((_, best)) if *best >= *t => {}
                    _ => {
                        survivors.insert(slot, (path.clone(), *t));
                    }
                }
            }

            candidates
                .into_iter()
                .filter(|(path, _, slot)| survivors.get(slot).map(|(p, _)| p) != Some(path))
                .map(|(path, _, _)| path)
                .collect()
        }

        RetentionType::Bucketed => {
            let Some(policy) = &retention.bucketed else {
                return Vec::new();
            };
            let mut buckets = policy.buckets.clone();
            buckets.sort_by_key(|b| b.max_age_days);

            let mut per_bucket: BTreeMap<u32, Vec<(PathBuf, DateTime<Utc>)>> = BTreeMap::new();
            let mut beyond: Vec<PathBuf> = Vec::new();
            for (path, t) in files {
                let age = age_days(*t);
                match buckets.iter().find(|b| age <= b.max_age_days) {
                    Some(bucket) => per_bucket
                        .entry(bucket.max_age_days)
                        .or_default()
                        .push((path.clone(), *t)),
                    None => beyond.push(path.clone()),
                }
            }

            let mut removals = beyond;
            for bucket in &buckets {
                if let Some(mut members) = per_bucket.remove(&bucket.max_age_days) {
                    members.sort_by(|a, b| b.1.cmp(&a.1)); // newest first
                    removals.extend(members.into_iter().skip(bucket.keep).map(|(p, _)| p));
                }
            }
            removals
        }
    }
}

/// Apply the retention policy to the archives directory. Returns the paths
/// removed.
pub fn cleanup_archives(retention: &RetentionConfig, archives_dir: &Path) -> Result<Vec<PathBuf>> {
    if !archives_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(archives_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let modified: DateTime<Utc> = entry.metadata()?.modified()?.into();
        files.push((entry.path(), modified));
    }

    let removals = plan_cleanup(retention, &files, Utc::now());
    for path in &removals {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove archive");
        } else {
            info!(path = %path.display(), "archive removed by retention policy");
        }
    }
    Ok(removals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BucketedRetention, HierarchicalRetention, RetentionBucket, RetentionInterval,
        SimpleRetention,
    };
    use chrono::Duration;

    fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
        now - Duration::days(days)
    }

    fn simple(days: u32) -> RetentionConfig {
        RetentionConfig {
            policy: RetentionType::Simple,
            simple: Some(SimpleRetention { days }),
            hierarchical: None,
            bucketed: None,
        }
    }

    #[test]
    fn test_simple_retention_removes_old_archives() {
        let now = Utc::now();
        let files = vec![
            (PathBuf::from("new.tar.gz"), days_ago(now, 5)),
            (PathBuf::from("old.tar.gz"), days_ago(now, 45)),
        ];
        let removals = plan_cleanup(&simple(30), &files, now);
        assert_eq!(removals, vec![PathBuf::from("old.tar.gz")]);
    }

    #[test]
    fn test_hierarchical_keeps_one_per_window() {
        let now = Utc::now();
        let retention = RetentionConfig {
            policy: RetentionType::Hierarchical,
            simple: None,
            hierarchical: Some(HierarchicalRetention {
                intervals: vec![RetentionInterval {
                    older_than_days: 7,
                    keep_one_per_days: 7,
                }],
            }),
            bucketed: None,
        };
        // Two archives pinned inside the same weekly window (windows are
        // aligned to multiples of 7 days since the epoch).
        let window_start = DateTime::from_timestamp(604_800 * 2_000, 0).unwrap();
        let newer = window_start + Duration::hours(30);
        let older = window_start + Duration::hours(5);
        let now = newer + Duration::days(20);
        let files = vec![
            (PathBuf::from("a.tar.gz"), newer),
            (PathBuf::from("b.tar.gz"), older),
            (PathBuf::from("young.tar.gz"), days_ago(now, 2)),
        ];
        let removals = plan_cleanup(&retention, &files, now);
        // The older of the pair goes; the young archive is untouched.
        assert_eq!(removals, vec![PathBuf::from("b.tar.gz")]);
    }

    #[test]
    fn test_bucketed_keeps_n_newest_per_bucket() {
        let now = Utc::now();
        let retention = RetentionConfig {
            policy: RetentionType::Bucketed,
            simple: None,
            hierarchical: None,
            bucketed: Some(BucketedRetention {
                buckets: vec![RetentionBucket {
                    max_age_days: 30,
                    keep: 2,
                }],
            }),
        };
        let files = vec![
            (PathBuf::from("d1.tar.gz"), days_ago(now, 1)),
            (PathBuf::from("d2.tar.gz"), days_ago(now, 2)),
            (PathBuf::from("d3.tar.gz"), days_ago(now, 3)),
            (PathBuf::from("ancient.tar.gz"), days_ago(now, 90)),
        ];
        let removals = plan_cleanup(&retention, &files, now);
        assert!(removals.contains(&PathBuf::from("ancient.tar.gz")));
        assert!(removals.contains(&PathBuf::from("d3.tar.gz")));
        assert_eq!(removals.len(), 2);
    }

    #[test]
    fn test_collect_and_archive_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let out_dir = tmp.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("app.bin"), b"binary").unwrap();
        std::fs::write(out_dir.join("notes.txt"), b"skip me").unwrap();

        let mut registry = NodeRegistry::new();
        let mut node = crate::types::BuildNode::new(0, "linux", NodeKind::Platform);
        node.artifact_dir = Some(out_dir.display().to_string());
        node.artifact_patterns = vec!["*.bin".to_string()];
        registry.add(node).unwrap();

        let artifacts = collect_artifacts(&registry).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].path.ends_with("app.bin"));

        let config = ArtifactsConfig {
            archive_enabled: true,
            archive_format: None,
            archive_name_template: Some("${target}_test".to_string()),
            cleanup_enabled: false,
            retention: None,
        };
        let archives = tmp.path().join("archives");
        let archive = archive_artifacts(&config, "all", &artifacts, &archives)
            .unwrap()
            .unwrap();
        assert!(archive.exists());
        assert_eq!(
            archive.file_name().unwrap().to_string_lossy(),
            "all_test.tar.gz"
        );
    }

    #[test]
    fn test_archive_disabled_returns_none() {
        let config = ArtifactsConfig {
            archive_enabled: false,
            archive_format: None,
            archive_name_template: None,
            cleanup_enabled: false,
            retention: None,
        };
        let result = archive_artifacts(&config, "all", &[], Path::new("/nonexistent")).unwrap();
        assert!(result.is_none());
    }
}
