//! CSV input: lazily read work items in bounded chunks.
//!
//! Recognised columns (extra columns are ignored):
//! - repository: `repo_url`, or `gh_project_name` (`owner/name` on GitHub)
//! - commit: `commit_sha`, or `git_trigger_commit`
//! - optional `project_key`

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use batch_scan_core::WorkItem;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OpsError, OpsResult};

/// Rows handed to the scheduler in one step.
#[derive(Debug, Default)]
pub struct InputChunk {
    pub items: Vec<WorkItem>,
    /// Rows dropped for missing repository or commit.
    pub invalid: usize,
}

/// A source of work items consumed chunk by chunk.
pub trait WorkSource: Send {
    /// Read up to `max` rows. `None` once the source is exhausted.
    fn next_chunk(&mut self, max: usize) -> OpsResult<Option<InputChunk>>;
}

impl WorkSource for std::vec::IntoIter<WorkItem> {
    fn next_chunk(&mut self, max: usize) -> OpsResult<Option<InputChunk>> {
        let items: Vec<WorkItem> = self.by_ref().take(max.max(1)).collect();
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(InputChunk { items, invalid: 0 }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    repo_url: Option<usize>,
    gh_project_name: Option<usize>,
    commit_sha: Option<usize>,
    git_trigger_commit: Option<usize>,
    project_key: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> OpsResult<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let columns = Self {
            repo_url: find("repo_url"),
            gh_project_name: find("gh_project_name"),
            commit_sha: find("commit_sha"),
            git_trigger_commit: find("git_trigger_commit"),
            project_key: find("project_key"),
        };

        if columns.repo_url.is_none() && columns.gh_project_name.is_none() {
            return Err(OpsError::Input(
                "missing repository column (repo_url or gh_project_name)".into(),
            ));
        }
        if columns.commit_sha.is_none() && columns.git_trigger_commit.is_none() {
            return Err(OpsError::Input(
                "missing commit column (commit_sha or git_trigger_commit)".into(),
            ));
        }
        Ok(columns)
    }

    fn item(&self, record: &csv::StringRecord) -> Option<WorkItem> {
        let field = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let repository_url = field(self.repo_url)
            .map(str::to_string)
            .or_else(|| field(self.gh_project_name).map(github_url))?;
        let commit = field(self.commit_sha).or_else(|| field(self.git_trigger_commit))?;
        let project_key = field(self.project_key).map(str::to_string);

        Some(WorkItem::new(repository_url, commit, project_key))
    }
}

fn github_url(project_name: &str) -> String {
    format!("https://github.com/{}.git", project_name.trim_matches('/'))
}

/// Streaming reader over an input CSV.
pub struct InputReader<R> {
    reader: csv::Reader<R>,
    columns: Columns,
    record: csv::StringRecord,
}

impl InputReader<File> {
    /// Open an input file.
    pub fn open(path: &Path) -> OpsResult<Self> {
        if !path.exists() {
            return Err(OpsError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read> InputReader<R> {
    pub fn from_reader(rdr: R) -> OpsResult<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
        let columns = Columns::from_headers(reader.headers()?)?;
        Ok(Self {
            reader,
            columns,
            record: csv::StringRecord::new(),
        })
    }

    /// Next row, `Some(None)` for an invalid one.
    fn next_row(&mut self) -> OpsResult<Option<Option<WorkItem>>> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => Ok(None),
            Ok(true) => {
                let item = self.columns.item(&self.record);
                if item.is_none() {
                    let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                    warn!(line, "Skipping input row without repository or commit");
                }
                Ok(Some(item))
            }
            // Undecodable rows are dropped like incomplete ones.
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                warn!(error = %e, "Skipping undecodable input row");
                Ok(Some(None))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Read + Send> WorkSource for InputReader<R> {
    fn next_chunk(&mut self, max: usize) -> OpsResult<Option<InputChunk>> {
        let mut chunk = InputChunk::default();
        let mut rows = 0;
        while rows < max.max(1) {
            match self.next_row()? {
                None => break,
                Some(Some(item)) => chunk.items.push(item),
                Some(None) => chunk.invalid += 1,
            }
            rows += 1;
        }

        if rows == 0 {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }
}

/// Overview of an input file without scanning it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSummary {
    /// Valid rows.
    pub total_commits: usize,
    /// Rows missing repository or commit.
    pub invalid: usize,
    /// Valid rows per repository URL.
    pub repos: BTreeMap<String, usize>,
}

/// Count rows per repository.
pub fn summarize<R: Read + Send>(rdr: R) -> OpsResult<InputSummary> {
    let mut reader = InputReader::from_reader(rdr)?;
    let mut summary = InputSummary::default();
    while let Some(chunk) = reader.next_chunk(1024)? {
        summary.invalid += chunk.invalid;
        for item in chunk.items {
            summary.total_commits += 1;
            *summary.repos.entry(item.repository_url).or_default() += 1;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(csv: &str, chunk: usize) -> (Vec<Vec<WorkItem>>, usize) {
        let mut reader = InputReader::from_reader(csv.as_bytes()).unwrap();
        let mut chunks = vec![];
        let mut invalid = 0;
        while let Some(c) = reader.next_chunk(chunk).unwrap() {
            invalid += c.invalid;
            chunks.push(c.items);
        }
        (chunks, invalid)
    }

    #[test]
    fn test_reads_repo_url_and_commit_sha() {
        let csv = "repo_url,commit_sha,project_key,extra\n\
                   https://github.com/acme/a.git,111,key-a,x\n\
                   https://github.com/acme/b.git,222,,y\n";
        let (chunks, invalid) = drain(csv, 10);

        assert_eq!(invalid, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0][0].project_key, "key-a");
        assert_eq!(chunks[0][1].project_key, "b_222");
    }

    #[test]
    fn test_gh_project_name_and_trigger_commit() {
        let csv = "gh_project_name,git_trigger_commit\nacme/widgets,abc\n";
        let (chunks, _) = drain(csv, 10);

        let item = &chunks[0][0];
        assert_eq!(item.repository_url, "https://github.com/acme/widgets.git");
        assert_eq!(item.commit_sha, "abc");
        assert_eq!(item.project_key, "widgets_abc");
    }

    #[test]
    fn test_chunks_are_bounded() {
        let mut csv = String::from("repo_url,commit_sha\n");
        for i in 0..7 {
            csv.push_str(&format!("https://example.com/r.git,{}\n", i));
        }
        let (chunks, _) = drain(&csv, 3);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, [3, 3, 1]);
    }

    #[test]
    fn test_incomplete_rows_are_invalid() {
        let csv = "repo_url,commit_sha\n\
                   https://example.com/r.git,\n\
                   ,abc\n\
                   https://example.com/r.git,def\n";
        let (chunks, invalid) = drain(csv, 10);
        assert_eq!(invalid, 2);
        assert_eq!(chunks[0].len(), 1);
    }

    #[test]
    fn test_missing_columns_rejected() {
        assert!(InputReader::from_reader("repo_url,sha\nx,y\n".as_bytes()).is_err());
        assert!(InputReader::from_reader("url,commit_sha\nx,y\n".as_bytes()).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let err = InputReader::open(Path::new("/definitely/not/here.csv")).err().unwrap();
        assert!(matches!(err, OpsError::InputNotFound { .. }));
    }

    #[test]
    fn test_summarize_counts_per_repo() {
        let csv = "repo_url,commit_sha\n\
                   https://example.com/a.git,1\n\
                   https://example.com/a.git,2\n\
                   https://example.com/b.git,3\n\
                   ,4\n";
        let summary = summarize(csv.as_bytes()).unwrap();
        assert_eq!(summary.total_commits, 3);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.repos["https://example.com/a.git"], 2);
    }

    #[test]
    fn test_vec_source() {
        let items = vec![
            WorkItem::new("u", "1", None),
            WorkItem::new("u", "2", None),
            WorkItem::new("u", "3", None),
        ];
        let mut source = items.into_iter();
        assert_eq!(source.next_chunk(2).unwrap().unwrap().items.len(), 2);
        assert_eq!(source.next_chunk(2).unwrap().unwrap().items.len(), 1);
        assert!(source.next_chunk(2).unwrap().is_none());
    }
}
