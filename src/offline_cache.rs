//! Cache-first shell for the app's static assets.
//!
//! Caches are named and versioned. `install` fills the current cache from the
//! network in one step, `activate` drops every other cache, and `handle_fetch`
//! answers GET requests from cache before trying the network.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::OfflineConfig;

/// What the request will be used for. Only documents get the fallback page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDestination {
    Document,
    Asset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRequest {
    pub method: String,
    pub path: String,
    pub destination: RequestDestination,
}

impl ShellRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            destination: RequestDestination::Asset,
        }
    }

    pub fn navigate(path: &str) -> Self {
        Self {
            destination: RequestDestination::Document,
            ..Self::get(path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ShellResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchDecision {
    /// Not handled by the shell; the request goes out untouched.
    PassThrough,
    Respond(ShellResponse),
    /// Neither cache nor network could answer.
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no network origin configured")]
    NoOrigin,
    #[error("network unavailable: {0}")]
    Offline(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("shell cache error: {0}")]
    Cache(#[from] rusqlite::Error),
    #[error("failed to fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to fetch {path}: status {status}")]
    BadStatus { path: String, status: u16 },
}

pub trait NetworkFetcher {
    /// Any HTTP status is a response. Only transport failures are errors.
    fn fetch(&self, path: &str) -> Result<ShellResponse, FetchError>;
}

/// Fetches shell assets from a fixed origin over HTTP.
pub struct UreqFetcher {
    origin: String,
    http_client: ureq::Agent,
}

impl UreqFetcher {
    pub fn new(origin: &str) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .build();
        Self {
            origin: origin.trim().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    fn read_response(response: ureq::Response) -> Result<ShellResponse, FetchError> {
        let status = response.status();
        let content_type = response.header("Content-Type").map(str::to_string);
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|err| FetchError::Offline(err.to_string()))?;
        Ok(ShellResponse {
            status,
            content_type,
            body,
        })
    }
}

impl NetworkFetcher for UreqFetcher {
    fn fetch(&self, path: &str) -> Result<ShellResponse, FetchError> {
        if self.origin.is_empty() {
            return Err(FetchError::NoOrigin);
        }
        let url = format!("{}{}", self.origin, path);
        match self.http_client.get(&url).call() {
            Ok(response) => Self::read_response(response),
            Err(ureq::Error::Status(_, response)) => Self::read_response(response),
            Err(ureq::Error::Transport(transport)) => {
                Err(FetchError::Offline(transport.to_string()))
            }
        }
    }
}

/// Named response caches persisted in SQLite.
pub struct ShellCache {
    conn: Connection,
}

impl ShellCache {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(db_path)?;
        let cache = Self { conn };
        cache.initialize_schema()?;
        Ok(cache)
    }

    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let cache = Self { conn };
        cache.initialize_schema()?;
        Ok(cache)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS shell_cache (
                cache_name TEXT NOT NULL,
                path TEXT NOT NULL,
                status INTEGER NOT NULL,
                content_type TEXT,
                body BLOB NOT NULL,
                PRIMARY KEY (cache_name, path)
            )",
            [],
        )?;
        Ok(())
    }

    /// Stores every entry or none of them.
    pub fn put_all(
        &mut self,
        cache_name: &str,
        entries: &[(String, ShellResponse)],
    ) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO shell_cache (cache_name, path, status, content_type, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (path, response) in entries {
                stmt.execute(params![
                    cache_name,
                    path,
                    response.status,
                    response.content_type,
                    response.body
                ])?;
            }
        }
        tx.commit()
    }

    pub fn lookup(&self, cache_name: &str, path: &str) -> Result<Option<ShellResponse>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT status, content_type, body FROM shell_cache
                 WHERE cache_name = ?1 AND path = ?2",
                params![cache_name, path],
                |row| {
                    Ok(ShellResponse {
                        status: row.get(0)?,
                        content_type: row.get(1)?,
                        body: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    /// Looks in `preferred` first, then in any other cache.
    pub fn lookup_any(
        &self,
        preferred: &str,
        path: &str,
    ) -> Result<Option<ShellResponse>, rusqlite::Error> {
        if let Some(response) = self.lookup(preferred, path)? {
            return Ok(Some(response));
        }
        for cache_name in self.cache_names()? {
            if cache_name == preferred {
                continue;
            }
            if let Some(response) = self.lookup(&cache_name, path)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    pub fn cache_names(&self) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT cache_name FROM shell_cache ORDER BY cache_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn delete_cache(&self, cache_name: &str) -> Result<usize, rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM shell_cache WHERE cache_name = ?1",
            params![cache_name],
        )
    }
}

pub struct OfflineShell<F: NetworkFetcher> {
    cache: ShellCache,
    fetcher: F,
    cache_name: String,
    static_assets: Vec<String>,
    fallback_document: String,
}

impl<F: NetworkFetcher> OfflineShell<F> {
    pub fn new(cache: ShellCache, fetcher: F, config: &OfflineConfig) -> Self {
        let mut seen = HashSet::new();
        let static_assets = config
            .static_assets
            .iter()
            .filter(|asset| seen.insert(asset.as_str()))
            .cloned()
            .collect();
        Self {
            cache,
            fetcher,
            cache_name: config.cache_name.clone(),
            static_assets,
            fallback_document: config.fallback_document.clone(),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn cache(&self) -> &ShellCache {
        &self.cache
    }

    /// Fetches the whole manifest and stores it under the current cache name.
    /// Any failed or non-success fetch aborts the install with nothing stored.
    pub fn install(&mut self) -> Result<usize, ShellError> {
        let mut entries = Vec::with_capacity(self.static_assets.len());
        for path in &self.static_assets {
            let response = self
                .fetcher
                .fetch(path)
                .map_err(|source| ShellError::Fetch {
                    path: path.clone(),
                    source,
                })?;
            if !response.is_success() {
                return Err(ShellError::BadStatus {
                    path: path.clone(),
                    status: response.status,
                });
            }
            entries.push((path.clone(), response));
        }

        self.cache.put_all(&self.cache_name, &entries)?;
        info!(
            "OfflineShell: installed {} assets into {}",
            entries.len(),
            self.cache_name
        );
        Ok(entries.len())
    }

    /// Deletes every cache except the current one. Returns the names removed.
    pub fn activate(&mut self) -> Result<Vec<String>, ShellError> {
        let mut removed = Vec::new();
        for name in self.cache.cache_names()? {
            if name != self.cache_name {
                let rows = self.cache.delete_cache(&name)?;
                debug!("OfflineShell: deleted stale cache {} ({} entries)", name, rows);
                removed.push(name);
            }
        }
        Ok(removed)
    }

    pub fn handle_fetch(&self, request: &ShellRequest) -> Result<FetchDecision, ShellError> {
        if !request.method.eq_ignore_ascii_case("GET") {
            return Ok(FetchDecision::PassThrough);
        }

        if let Some(cached) = self.cache.lookup_any(&self.cache_name, &request.path)? {
            return Ok(FetchDecision::Respond(cached));
        }

        match self.fetcher.fetch(&request.path) {
            Ok(response) => Ok(FetchDecision::Respond(response)),
            Err(err) => {
                warn!("OfflineShell: network failed for {}: {}", request.path, err);
                if request.destination == RequestDestination::Document {
                    if let Some(fallback) = self
                        .cache
                        .lookup_any(&self.cache_name, &self.fallback_document)?
                    {
                        return Ok(FetchDecision::Respond(fallback));
                    }
                }
                Ok(FetchDecision::Unavailable)
            }
        }
    }
}
