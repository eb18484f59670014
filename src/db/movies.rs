//! Movie records under optimistic concurrency control
//!
//! Every update is a single conditional statement
//! (`... WHERE id = ? AND version = ?`) and the affected row is the only
//! success signal. Nothing here takes an application-level lock.

use chrono::{DateTime, Datelike, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Row, ToSql};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::debug;

use crate::db::Database;
use crate::types::{MarqueeError, Result};
use crate::validation::{permitted_value, unique, Validator};

/// Sort keys accepted by [`MovieStore::get_all`]
pub const MOVIE_SORT_SAFELIST: &[&str] = &[
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

/// Running time in minutes, rendered as `"<n> mins"`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Runtime(pub i32);

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

impl std::str::FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || "invalid runtime format".to_string();
        let mut parts = s.split(' ');
        let (minutes, unit) = match (parts.next(), parts.next(), parts.next()) {
            (Some(minutes), Some(unit), None) => (minutes, unit),
            _ => return Err(invalid()),
        };
        if unit != "mins" {
            return Err(invalid());
        }
        minutes.parse::<i32>().map(Runtime).map_err(|_| invalid())
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A versioned movie record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movie {
    pub id: i64,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub year: i32,
    #[serde(skip_serializing_if = "is_zero_runtime")]
    pub runtime: Runtime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    pub version: i32,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

fn is_zero_runtime(r: &Runtime) -> bool {
    r.0 == 0
}

impl Movie {
    /// Create an unsaved movie; id and version are assigned on insert
    pub fn new(title: impl Into<String>, year: i32, runtime: Runtime, genres: Vec<String>) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            title: title.into(),
            year,
            runtime,
            genres,
            version: 0,
        }
    }

    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        let genres_json: String = row.get("genres")?;
        let genres = serde_json::from_str(&genres_json).map_err(|e| {
            let idx = row.as_ref().column_index("genres").unwrap_or(0);
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            title: row.get("title")?,
            year: row.get("year")?,
            runtime: Runtime(row.get("runtime")?),
            genres,
            version: row.get("version")?,
        })
    }
}

/// Caller-supplied changes; `None` leaves the field as it is
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieUpdate {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<Runtime>,
    pub genres: Option<Vec<String>>,
}

impl MovieUpdate {
    pub fn apply(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

pub fn validate_movie(v: &mut Validator, movie: &Movie) {
    v.check(!movie.title.is_empty(), "title", "must be provided");
    v.check(movie.title.len() <= 500, "title", "must not be more than 500 bytes long");

    v.check(movie.year != 0, "year", "must be provided");
    v.check(movie.year >= 1888, "year", "must be greater than 1888");
    v.check(movie.year <= Utc::now().year(), "year", "must not be in the future");

    v.check(movie.runtime.0 != 0, "runtime", "must be provided");
    v.check(movie.runtime.0 > 0, "runtime", "must be a positive integer");

    v.check(!movie.genres.is_empty(), "genres", "must contain at least 1 genre");
    v.check(movie.genres.len() <= 5, "genres", "must not contain more than 5 genres");
    v.check(unique(&movie.genres), "genres", "must not contain duplicate values");
}

/// Paging and sort options for list queries
#[derive(Debug, Clone)]
pub struct Filters {
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
    pub sort_safelist: &'static [&'static str],
}

impl Filters {
    /// Filters over movies with the movie sort safelist
    pub fn for_movies(page: i64, page_size: i64, sort: impl Into<String>) -> Self {
        Self {
            page,
            page_size,
            sort: sort.into(),
            sort_safelist: MOVIE_SORT_SAFELIST,
        }
    }

    /// Column to sort by, checked against the safelist before it goes near SQL
    pub fn sort_column(&self) -> Result<&str> {
        if !permitted_value(&self.sort.as_str(), self.sort_safelist) {
            return Err(MarqueeError::internal(format!(
                "unsafe sort parameter: {}",
                self.sort
            )));
        }
        Ok(self.sort.trim_start_matches('-'))
    }

    pub fn sort_direction(&self) -> &'static str {
        if self.sort.starts_with('-') {
            "DESC"
        } else {
            "ASC"
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

impl Default for Filters {
    fn default() -> Self {
        Self::for_movies(1, 20, "id")
    }
}

pub fn validate_filters(v: &mut Validator, f: &Filters) {
    v.check(f.page > 0, "page", "must be greater than zero");
    v.check(f.page <= 10_000_000, "page", "must be a maximum of 10 million");
    v.check(f.page_size > 0, "page_size", "must be greater than zero");
    v.check(f.page_size <= 100, "page_size", "must be a maximum of 100");
    v.check(
        permitted_value(&f.sort.as_str(), f.sort_safelist),
        "sort",
        "invalid sort value",
    );
}

/// Pagination details for a page of results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub current_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub page_size: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub first_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub last_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub total_records: i64,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

impl Metadata {
    /// Metadata for `total_records` matches; all zero when there are none
    pub fn calculate(total_records: i64, page: i64, page_size: i64) -> Self {
        if total_records == 0 || page_size <= 0 {
            return Self::default();
        }

        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: (total_records + page_size - 1) / page_size,
            total_records,
        }
    }

    /// Number of pages, the same as `last_page`
    pub fn total_pages(&self) -> i64 {
        self.last_page
    }
}

/// Quote each whitespace-separated term so user input is never FTS syntax
fn fts_match_expression(search: &str) -> Option<String> {
    let terms: Vec<String> = search
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Store for movie records
#[derive(Clone)]
pub struct MovieStore {
    db: Database,
}

impl MovieStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a movie, assigning id, creation time and version 1
    pub async fn insert(&self, movie: &mut Movie) -> Result<()> {
        let created_at = Utc::now();
        let title = movie.title.clone();
        let year = movie.year;
        let runtime = movie.runtime.0;
        let genres = serde_json::to_string(&movie.genres)?;

        let (id, version) = self
            .db
            .call("movies.insert", move |conn| {
                Ok(conn.query_row(
                    "INSERT INTO movies (created_at, title, year, runtime, genres)
                     VALUES (?, ?, ?, ?, ?)
                     RETURNING id, version",
                    params![created_at, title, year, runtime, genres],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i32>(1)?)),
                )?)
            })
            .await?;

        movie.id = id;
        movie.created_at = created_at;
        movie.version = version;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Movie> {
        if id < 1 {
            return Err(MarqueeError::NotFound);
        }

        self.db
            .call("movies.get", move |conn| {
                Ok(conn.query_row(
                    "SELECT id, created_at, title, year, runtime, genres, version
                     FROM movies WHERE id = ?",
                    params![id],
                    Movie::from_row,
                )?)
            })
            .await
    }

    /// Write `movie` if its version is still the stored one
    ///
    /// On success the stored version is `observed + 1` and `movie.version`
    /// is updated to match. If another writer got there first, or the row is
    /// gone, the result is `EditConflict` and the caller must re-read.
    pub async fn update(&self, movie: &mut Movie) -> Result<()> {
        let id = movie.id;
        let observed = movie.version;
        let title = movie.title.clone();
        let year = movie.year;
        let runtime = movie.runtime.0;
        let genres = serde_json::to_string(&movie.genres)?;

        let version = self
            .db
            .call("movies.update", move |conn| {
                match conn.query_row(
                    "UPDATE movies
                     SET title = ?, year = ?, runtime = ?, genres = ?, version = version + 1
                     WHERE id = ? AND version = ?
                     RETURNING version",
                    params![title, year, runtime, genres, id, observed],
                    |row| row.get::<_, i32>(0),
                ) {
                    Ok(version) => Ok(version),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Err(MarqueeError::EditConflict),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        debug!("Movie {} updated to version {}", id, version);
        movie.version = version;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        if id < 1 {
            return Err(MarqueeError::NotFound);
        }

        let changes = self
            .db
            .call("movies.delete", move |conn| {
                Ok(conn.execute("DELETE FROM movies WHERE id = ?", params![id])?)
            })
            .await?;

        if changes == 0 {
            return Err(MarqueeError::NotFound);
        }
        Ok(())
    }

    /// Filtered, sorted page of movies plus pagination metadata
    ///
    /// An empty `title` matches everything; otherwise every term must appear
    /// in the title. Every entry of `genres` must be present on the movie.
    /// The total is a window count taken in the same statement as the page.
    pub async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> Result<(Vec<Movie>, Metadata)> {
        let column = filters.sort_column()?;
        let direction = filters.sort_direction();

        let mut sql = String::from(
            "SELECT count(*) OVER() AS total_records,
                    id, created_at, title, year, runtime, genres, version
             FROM movies",
        );
        let mut params: Vec<Box<dyn ToSql + Send>> = vec![];
        let mut conditions = vec![];

        if let Some(expr) = fts_match_expression(title) {
            conditions.push("id IN (SELECT rowid FROM movies_fts WHERE movies_fts MATCH ?)");
            params.push(Box::new(expr));
        }

        for genre in genres {
            conditions.push("EXISTS (SELECT 1 FROM json_each(movies.genres) WHERE value = ?)");
            params.push(Box::new(genre.clone()));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        sql.push_str(&format!(
            " ORDER BY {} {}, id ASC LIMIT ? OFFSET ?",
            column, direction
        ));
        params.push(Box::new(filters.limit()));
        params.push(Box::new(filters.offset()));

        debug!("Executing query: {}", sql);

        let (total_records, movies) = self
            .db
            .call("movies.get_all", move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn ToSql> =
                    params.iter().map(|p| p.as_ref() as &dyn ToSql).collect();

                let rows = stmt.query_map(param_refs.as_slice(), |row| {
                    Ok((row.get::<_, i64>("total_records")?, Movie::from_row(row)?))
                })?;

                let mut total_records = 0;
                let mut movies = vec![];
                for row in rows {
                    let (total, movie) = row?;
                    total_records = total;
                    movies.push(movie);
                }

                Ok((total_records, movies))
            })
            .await?;

        let metadata = Metadata::calculate(total_records, filters.page, filters.page_size);
        Ok((movies, metadata))
    }
}
