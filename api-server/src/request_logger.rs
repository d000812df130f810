use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Fairing that logs one line per HTTP request with its duration.
pub struct RequestLogger;

#[derive(Clone, Copy)]
struct RequestStart(Instant);

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(|| RequestStart(Instant::now()));
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let RequestStart(started) = *request.local_cache(|| RequestStart(Instant::now()));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status = response.status();

        if status.code >= 500 {
            log::warn!(
                "{} {} -> {} ({:.2}ms)",
                request.method(),
                request.uri(),
                status.code,
                elapsed_ms
            );
        } else {
            log::info!(
                "{} {} -> {} ({:.2}ms)",
                request.method(),
                request.uri(),
                status.code,
                elapsed_ms
            );
        }
    }
}
