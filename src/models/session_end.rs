use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response returned after ending a session
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SessionEndResponse {
    pub ended: bool,
}
