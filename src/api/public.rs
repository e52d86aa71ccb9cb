use rocket::{serde::json::Json, Route, State};

use crate::{
    engine::{PollRegistry, VoteLedger},
    error::{Error, Result},
    model::{
        api::poll::{PollResults, PollView},
        mongodb::Id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![active_poll, poll, results]
}

#[get("/polls/active")]
async fn active_poll(polls: &State<PollRegistry>) -> Result<Json<PollView>> {
    let poll = polls
        .get_active()
        .await?
        .ok_or_else(|| Error::not_found("Active poll".to_string()))?;
    Ok(Json(poll.into()))
}

#[get("/polls/<poll_id>")]
async fn poll(poll_id: Id, polls: &State<PollRegistry>) -> Result<Json<PollView>> {
    Ok(Json(polls.poll(poll_id).await?.into()))
}

/// Results are public, for past polls as well as the active one.
#[get("/polls/<poll_id>/results")]
async fn results(poll_id: Id, ledger: &State<VoteLedger>) -> Result<Json<PollResults>> {
    Ok(Json(ledger.tally(poll_id).await?.into()))
}
