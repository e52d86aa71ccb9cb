use chrono::Duration;
use log::info;
use rocket::{
    http::{Cookie, CookieJar, SameSite, Status},
    outcome::try_outcome,
    request::{self, FromRequest},
    serde::json::Json,
    Request, Route, State,
};

use crate::{
    engine::{CodeIssuer, IdentityStore, SessionBinder, SessionToken},
    error::{Error, Result},
    model::{
        api::{
            auth::{AdminLogin, IdentityRef, VerifyRequest, ADMIN_SESSION_COOKIE, SESSION_COOKIE},
            identity::{ChannelRequest, CodeIssued, IdentityView},
        },
        mongodb::Id,
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![challenge, verify, logout, admin_login, admin_logout]
}

/// A request made by a logged-in voter.
#[derive(Debug, Clone, Copy)]
pub struct VoterSession {
    pub id: Id,
}

/// A request made by a logged-in admin.
#[derive(Debug, Clone, Copy)]
pub struct AdminSession;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for VoterSession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let sessions = try_outcome!(req.guard::<&State<SessionBinder>>().await);
        let Some(cookie) = req.cookies().get_private(SESSION_COOKIE) else {
            return request::Outcome::Failure((Status::Unauthorized, ()));
        };
        match sessions.resolve(&SessionToken::from(cookie.value())).await {
            Some(id) => request::Outcome::Success(VoterSession { id }),
            None => request::Outcome::Failure((Status::Unauthorized, ())),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminSession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let sessions = try_outcome!(req.guard::<&State<SessionBinder>>().await);
        let Some(cookie) = req.cookies().get_private(ADMIN_SESSION_COOKIE) else {
            return request::Outcome::Failure((Status::Unauthorized, ()));
        };
        if sessions.is_admin(&SessionToken::from(cookie.value())).await {
            request::Outcome::Success(AdminSession)
        } else {
            request::Outcome::Failure((Status::Unauthorized, ()))
        }
    }
}

fn session_cookie(name: &'static str, token: SessionToken, ttl: Duration) -> Cookie<'static> {
    Cookie::build(name, String::from(token))
        .max_age(rocket::time::Duration::seconds(ttl.num_seconds()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .finish()
}

/// End the session named by the cookie, if there is one.
async fn end_session(cookies: &CookieJar<'_>, name: &'static str, sessions: &SessionBinder) {
    if let Some(cookie) = cookies.get_private(name) {
        sessions.destroy(&SessionToken::from(cookie.value())).await;
    }
    cookies.remove_private(Cookie::named(name));
}

/// Issue a code for an identity found by its channel value.
#[post("/auth/challenge", data = "<request>", format = "json")]
pub async fn challenge(
    request: Json<ChannelRequest>,
    identities: &State<IdentityStore>,
    codes: &State<CodeIssuer>,
) -> Result<Json<CodeIssued>> {
    let value = request.parse()?;
    let identity = identities
        .get_by_channel(&value)
        .await?
        .ok_or_else(|| Error::not_found(format!("Identity with {} '{value}'", value.channel())))?;
    let issued = codes.issue_for(identity.id, value.channel()).await?;
    Ok(Json(issued.into()))
}

/// Check a code and, on success, log the identity in.
#[post("/auth/verify", data = "<request>", format = "json")]
pub async fn verify(
    request: Json<VerifyRequest>,
    cookies: &CookieJar<'_>,
    identities: &State<IdentityStore>,
    codes: &State<CodeIssuer>,
    sessions: &State<SessionBinder>,
) -> Result<Json<IdentityView>> {
    let id = match request.target()? {
        IdentityRef::Id(id) => *id,
        IdentityRef::Value(value) => {
            identities
                .get_by_channel(&value)
                .await?
                .ok_or(Error::NoCodeIssued)?
                .id
        }
    };

    codes.verify(id, &request.code).await?;
    let token = sessions.create_session(id).await;
    cookies.add_private(session_cookie(SESSION_COOKIE, token, sessions.ttl()));

    Ok(Json(identities.identity(id).await?.into()))
}

#[delete("/auth")]
pub async fn logout(cookies: &CookieJar<'_>, sessions: &State<SessionBinder>) {
    end_session(cookies, SESSION_COOKIE, sessions).await;
}

#[post("/auth/admin", data = "<login>", format = "json")]
pub async fn admin_login(
    login: Json<AdminLogin>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    sessions: &State<SessionBinder>,
) -> Result<()> {
    if !config.verify_admin_password(&login.password) {
        return Err(Error::Status(
            Status::Unauthorized,
            "Incorrect admin password".to_string(),
        ));
    }

    let token = sessions.create_admin_session().await;
    cookies.add_private(session_cookie(ADMIN_SESSION_COOKIE, token, sessions.ttl()));
    info!("Admin logged in");
    Ok(())
}

#[delete("/auth/admin")]
pub async fn admin_logout(cookies: &CookieJar<'_>, sessions: &State<SessionBinder>) {
    end_session(cookies, ADMIN_SESSION_COOKIE, sessions).await;
}
