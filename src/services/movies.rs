//! Movie workflows
//!
//! Reads require `movies:read`, writes `movies:write`, and both require an
//! activated principal.

use tracing::info;

use crate::auth::permissions::{MOVIES_READ, MOVIES_WRITE};
use crate::auth::Principal;
use crate::db::movies::{
    validate_filters, validate_movie, Filters, Metadata, Movie, MovieUpdate, Runtime,
};
use crate::services::AppState;
use crate::types::{MarqueeError, Result};
use crate::validation::Validator;

pub async fn create_movie(
    state: &AppState,
    principal: &Principal,
    title: &str,
    year: i32,
    runtime: Runtime,
    genres: Vec<String>,
) -> Result<Movie> {
    let user = state.gate.require_permission(principal, MOVIES_WRITE).await?;

    let mut movie = Movie::new(title, year, runtime, genres);
    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    v.into_result()?;

    state.movies.insert(&mut movie).await?;
    info!("User {} created movie {}", user.id, movie.id);
    Ok(movie)
}

pub async fn show_movie(state: &AppState, principal: &Principal, id: i64) -> Result<Movie> {
    state.gate.require_permission(principal, MOVIES_READ).await?;
    state.movies.get(id).await
}

/// Apply a partial update to the stored movie
///
/// When `expected_version` is given and differs from the stored version the
/// update is refused with `EditConflict` before anything is written. The
/// write itself is conditional on the version read here, so a concurrent
/// writer still yields `EditConflict` rather than a lost update.
pub async fn update_movie(
    state: &AppState,
    principal: &Principal,
    id: i64,
    expected_version: Option<i32>,
    changes: MovieUpdate,
) -> Result<Movie> {
    let user = state.gate.require_permission(principal, MOVIES_WRITE).await?;

    let mut movie = state.movies.get(id).await?;
    if let Some(expected) = expected_version {
        if expected != movie.version {
            return Err(MarqueeError::EditConflict);
        }
    }

    changes.apply(&mut movie);

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    v.into_result()?;

    state.movies.update(&mut movie).await?;
    info!("User {} updated movie {} to version {}", user.id, movie.id, movie.version);
    Ok(movie)
}

pub async fn delete_movie(state: &AppState, principal: &Principal, id: i64) -> Result<()> {
    let user = state.gate.require_permission(principal, MOVIES_WRITE).await?;
    state.movies.delete(id).await?;
    info!("User {} deleted movie {}", user.id, id);
    Ok(())
}

/// Filtered page of movies with its pagination metadata
pub async fn list_movies(
    state: &AppState,
    principal: &Principal,
    title: &str,
    genres: &[String],
    filters: &Filters,
) -> Result<(Vec<Movie>, Metadata)> {
    state.gate.require_permission(principal, MOVIES_READ).await?;

    let mut v = Validator::new();
    validate_filters(&mut v, filters);
    v.into_result()?;

    state.movies.get_all(title, genres, filters).await
}
