//! Route definitions for script endpoints.

use axum::routing::get;
use axum::Router;

use crate::handlers::scripts;
use crate::state::AppState;

/// Script routes, mounted at the root.
///
/// ```text
/// POST   /scripts        -> add_script       (?replace=true to overwrite)
/// GET    /scripts        -> list_scripts     (?pattern=..., repeatable)
/// POST   /scripts/{id}   -> execute_script
/// GET    /scripts/{id}   -> get_script
/// DELETE /scripts/{id}   -> remove_script
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/scripts",
            get(scripts::list_scripts).post(scripts::add_script),
        )
        .route(
            "/scripts/{id}",
            get(scripts::get_script)
                .post(scripts::execute_script)
                .delete(scripts::remove_script),
        )
}
