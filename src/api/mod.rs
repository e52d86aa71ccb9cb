use rocket::{http::Status, serde::json::Json, Catcher, Request, Route};

use crate::error::ErrorBody;

pub use self::auth::{AdminSession, VoterSession};

mod admin;
pub(crate) mod auth;
pub(crate) mod identity;
mod public;
mod voter;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(auth::routes());
    routes.extend(identity::routes());
    routes.extend(public::routes());
    routes.extend(voter::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Give guard and routing failures the same JSON body as handler errors.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> (Status, Json<ErrorBody>) {
    let error = match status.code {
        400 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        422 => "unprocessable",
        500..=599 => "internal",
        _ => "other",
    };
    let body = ErrorBody {
        error: error.to_string(),
        message: status.reason_lossy().to_string(),
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use rocket::local::asynchronous::Client;

    use super::*;

    #[backend_test]
    async fn unknown_route_is_json(client: Client) {
        let response = client.get("/nowhere").dispatch().await;

        assert_eq!(Status::NotFound, response.status());
        let body: ErrorBody = response.into_json().await.unwrap();
        assert_eq!(body.error, "not_found");
    }

    #[backend_test]
    async fn malformed_id_is_not_found(client: Client) {
        let response = client.get("/polls/not-an-id").dispatch().await;

        assert_eq!(Status::NotFound, response.status());
    }
}
