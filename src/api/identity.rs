use rocket::{serde::json::Json, Route, State};

use crate::{
    engine::{CodeIssuer, IdentityStore},
    error::Result,
    model::{
        api::identity::{CodeIssued, RegisterRequest, Registered},
        channel::Channel,
        mongodb::Id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![register, challenge]
}

#[post("/identities", data = "<request>", format = "json")]
pub async fn register(
    request: Json<RegisterRequest>,
    identities: &State<IdentityStore>,
) -> Result<Json<Registered>> {
    let (value, name) = request.validate()?;
    let id = identities.register(value, &name).await?;
    Ok(Json(Registered { id: id.into() }))
}

/// Issue a code for the identity, on the given channel or its primary one.
#[post("/identities/<id>/challenge?<channel>")]
pub async fn challenge(
    id: Id,
    channel: Option<Channel>,
    codes: &State<CodeIssuer>,
) -> Result<Json<CodeIssued>> {
    let issued = match channel {
        Some(channel) => codes.issue_for(id, channel).await?,
        None => codes.issue(id).await?,
    };
    Ok(Json(issued.into()))
}
