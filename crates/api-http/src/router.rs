// Route table (§6 HTTP surface). One `Router` wires every `/v1/*` path to
// its handler; `main` in testflinger-server only has to hand this a built
// `AppState` and a `TcpListener`.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::routes::{agents, client_permissions, job, oauth, queues, restricted_queues, result, secrets};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let max_body = state.max_result_bytes;

    Router::new()
        .route("/v1/job", post(job::submit_job).get(job::poll_job))
        .route("/v1/job/search", get(job::search_jobs))
        .route("/v1/job/:id", get(job::get_job))
        .route("/v1/job/:id/attachments", get(job::get_attachments).post(job::post_attachments))
        .route("/v1/job/:id/action", post(job::job_action))
        .route("/v1/job/:id/position", get(job::job_position))
        .route("/v1/job/:id/events", post(job::post_events))
        .route("/v1/job/:id/output", get(job::get_legacy_output))
        .route("/v1/job/:id/serial_output", get(job::get_legacy_serial))
        .route("/v1/result/:id", post(result::post_result).get(result::get_result))
        .route("/v1/result/:id/artifact", post(result::post_artifact).get(result::get_artifact))
        .route("/v1/result/:id/log/:log_type", post(result::post_log).get(result::get_log))
        .route("/v1/agents/queues", get(agents::get_queues).post(agents::post_queues))
        .route("/v1/agents/images/:queue", get(agents::get_images))
        .route("/v1/agents/images", post(agents::post_images))
        .route("/v1/agents/data", get(agents::get_all_agent_data))
        .route("/v1/agents/data/:name", get(agents::get_agent_data).post(agents::post_agent_data))
        .route("/v1/agents/provision_logs/:name", post(agents::post_provision_logs))
        .route("/v1/oauth2/token", post(oauth::token))
        .route("/v1/oauth2/refresh", post(oauth::refresh))
        .route("/v1/oauth2/revoke", post(oauth::revoke))
        .route("/v1/restricted-queues", get(restricted_queues::list))
        .route(
            "/v1/restricted-queues/:name",
            get(restricted_queues::owners).post(restricted_queues::add_owner).delete(restricted_queues::remove),
        )
        .route(
            "/v1/client-permissions",
            get(client_permissions::list),
        )
        .route(
            "/v1/client-permissions/:id",
            get(client_permissions::get).put(client_permissions::put).delete(client_permissions::delete),
        )
        .route("/v1/secrets/:client_id/:path", put(secrets::put).delete(secrets::delete))
        .route("/v1/queues/:name/agents", get(queues::agents_on_queue))
        .route("/v1/queues/:name/jobs", get(queues::jobs_on_queue))
        .route("/v1/queues/wait_times", get(queues::wait_times))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
