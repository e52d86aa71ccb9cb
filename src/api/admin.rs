use rocket::{serde::json::Json, Route, State};

use crate::{
    api::AdminSession,
    engine::{IdentityStore, PollRegistry, VoteLedger},
    error::Result,
    model::{
        api::{
            identity::IdentityView,
            poll::{BallotView, PollSpec, PollView},
        },
        mongodb::Id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![create_poll, list_polls, poll_votes, list_identities]
}

/// Create a poll, which immediately becomes the only active one.
#[post("/polls", data = "<spec>", format = "json")]
async fn create_poll(
    _admin: AdminSession,
    spec: Json<PollSpec>,
    polls: &State<PollRegistry>,
) -> Result<Json<PollView>> {
    let id = polls
        .create_poll(&spec.question, &spec.options.labels())
        .await?;
    Ok(Json(polls.poll(id).await?.into()))
}

#[get("/polls")]
async fn list_polls(
    _admin: AdminSession,
    polls: &State<PollRegistry>,
) -> Result<Json<Vec<PollView>>> {
    let polls = polls.list().await?;
    Ok(Json(polls.into_iter().map(Into::into).collect()))
}

/// The raw results view: every vote in a poll with who cast it.
#[get("/polls/<poll_id>/votes")]
async fn poll_votes(
    _admin: AdminSession,
    poll_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<Vec<BallotView>>> {
    let ballots = ledger.ballots(poll_id).await?;
    Ok(Json(ballots.into_iter().map(Into::into).collect()))
}

#[get("/identities")]
async fn list_identities(
    _admin: AdminSession,
    identities: &State<IdentityStore>,
) -> Result<Json<Vec<IdentityView>>> {
    let identities = identities.list().await?;
    Ok(Json(identities.into_iter().map(Into::into).collect()))
}
