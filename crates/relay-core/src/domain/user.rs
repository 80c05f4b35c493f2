//! User - the sample record sent by the one-shot publisher.
//!
//! `User` carries an internal id that must never reach the broker. Encoding
//! goes through [`UserView`], which lists exactly the fields that are allowed
//! on the wire.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub age: u32,
    pub email: String,
    pub internal_id: String,
}

/// Wire representation of a [`User`].
#[derive(Debug, Serialize)]
pub struct UserView<'a> {
    pub name: &'a str,
    pub age: u32,
    pub email: &'a str,
}

impl<'a> From<&'a User> for UserView<'a> {
    fn from(user: &'a User) -> Self {
        Self {
            name: &user.name,
            age: user.age,
            email: &user.email,
        }
    }
}

impl User {
    /// The record the publisher sends when no fields are given.
    pub fn sample() -> Self {
        Self {
            name: "Alice".to_string(),
            age: 30,
            email: "alice@example.com".to_string(),
            internal_id: "xyz-123".to_string(),
        }
    }

    /// JSON body as it crosses the wire.
    pub fn to_wire_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&UserView::from(self))
    }
}
