use loyalty_core::UserId;

/// Authenticated user of a request.
///
/// Inserted by the auth middleware; every protected handler passes it on to
/// the service call it makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    user_id: UserId,
    login: String,
}

impl UserContext {
    pub fn new(user_id: UserId, login: impl Into<String>) -> Self {
        Self {
            user_id,
            login: login.into(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn login(&self) -> &str {
        &self.login
    }
}
