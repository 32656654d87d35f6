//! Pre-normalised records on disk, one `PriceRecord` JSON object per line.
//!
//! Used to load a catalog offline or to replay a captured feed. The file for
//! a scope is `{dir}/{provider}-{location}-{service}.jsonl`, with spaces and
//! slashes in the service replaced by `_`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use domain_pricing::{
    CloudProvider, IngestionScope, PriceRecord, PricingSource, RecordStream, SourceError,
};
use futures::{StreamExt, stream};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

pub struct JsonLinesSource {
    provider: CloudProvider,
    dir: PathBuf,
}

impl JsonLinesSource {
    pub fn new(provider: CloudProvider, dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            dir: dir.into(),
        }
    }

    pub fn path_for(&self, scope: &IngestionScope) -> PathBuf {
        let sanitize = |s: &str| s.replace([' ', '/', '\\'], "_");
        self.dir.join(format!(
            "{}-{}-{}.jsonl",
            scope.provider,
            sanitize(&scope.location),
            sanitize(&scope.service)
        ))
    }
}

#[async_trait]
impl PricingSource for JsonLinesSource {
    fn provider(&self) -> CloudProvider {
        self.provider
    }

    fn name(&self) -> &'static str {
        "jsonl-file"
    }

    async fn open(&self, scope: &IngestionScope) -> Result<RecordStream, SourceError> {
        if scope.provider != self.provider {
            return Err(SourceError::UnsupportedScope {
                source_name: self.name(),
                scope: scope.clone(),
            });
        }

        let path = self.path_for(scope);
        info!(path = %path.display(), scope = %scope, "Reading pricing records");
        let file = File::open(&path).await?;

        Ok(read_records(BufReader::new(file), path).boxed())
    }
}

/// Lazily parses one record per non-blank line; errors name the line
fn read_records(
    reader: BufReader<File>,
    path: PathBuf,
) -> impl futures::Stream<Item = Result<PriceRecord, SourceError>> + Send + 'static {
    stream::try_unfold((reader.lines(), 0usize), move |(mut lines, mut line_no)| {
        let path = path.clone();
        async move {
            loop {
                let Some(line) = lines.next_line().await? else {
                    return Ok::<_, SourceError>(None);
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let record = parse_line(&line, &path, line_no)?;
                return Ok(Some((record, (lines, line_no))));
            }
        }
    })
}

fn parse_line(line: &str, path: &Path, line_no: usize) -> Result<PriceRecord, SourceError> {
    serde_json::from_str(line)
        .map_err(|e| SourceError::Parse(format!("{}:{}: {}", path.display(), line_no, e)))
}
