use rocket::{serde::json::Json, Route, State};

use crate::{
    api::VoterSession,
    engine::{IdentityStore, VoteLedger},
    error::Result,
    model::{
        api::{
            identity::{ChannelRequest, IdentityView},
            poll::{VoteCast, VoteRequest, VoteStatus},
        },
        mongodb::Id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![me, link_channel, cast_vote, vote_status]
}

#[get("/voter")]
async fn me(session: VoterSession, identities: &State<IdentityStore>) -> Result<Json<IdentityView>> {
    Ok(Json(identities.identity(session.id).await?.into()))
}

/// Attach a phone number or email to the logged-in identity. It must then be
/// verified with a code like any other.
#[post("/voter/channels", data = "<request>", format = "json")]
async fn link_channel(
    session: VoterSession,
    request: Json<ChannelRequest>,
    identities: &State<IdentityStore>,
) -> Result<Json<IdentityView>> {
    let value = request.parse()?;
    identities.link_channel(session.id, value).await?;
    Ok(Json(identities.identity(session.id).await?.into()))
}

#[post("/voter/polls/<poll_id>/vote", data = "<request>", format = "json")]
async fn cast_vote(
    session: VoterSession,
    poll_id: Id,
    request: Json<VoteRequest>,
    ledger: &State<VoteLedger>,
) -> Result<Json<VoteCast>> {
    let id = ledger.cast_vote(session.id, poll_id, request.option).await?;
    Ok(Json(VoteCast {
        id: id.into(),
        poll: poll_id.into(),
        option: request.option,
    }))
}

#[get("/voter/polls/<poll_id>/vote")]
async fn vote_status(
    session: VoterSession,
    poll_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<VoteStatus>> {
    Ok(Json(ledger.vote_of(session.id, poll_id).await?.into()))
}
