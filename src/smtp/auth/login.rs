use async_trait::async_trait;

use super::{decode, encode, validate, AuthMechanism, AuthMechanismProcessor, AuthStatus, Credentials};
use crate::smtp::connection::Connection;
use crate::smtp::error::VerbError;

/// `LOGIN`: username and password in two prompted steps.
pub struct LoginMechanism;

impl AuthMechanism for LoginMechanism {
    fn identifier(&self) -> &str {
        "LOGIN"
    }

    fn create_processor(&self, _connection: &Connection) -> Box<dyn AuthMechanismProcessor> {
        Box::new(LoginProcessor {
            state: LoginState::Initial,
            credentials: None,
        })
    }
}

enum LoginState {
    Initial,
    AwaitingUsername,
    AwaitingPassword { username: String },
    Done,
}

struct LoginProcessor {
    state: LoginState,
    credentials: Option<Credentials>,
}

#[async_trait]
impl AuthMechanismProcessor for LoginProcessor {
    async fn process_response(
        &mut self,
        connection: &Connection,
        data: Option<&str>,
    ) -> Result<AuthStatus, VerbError> {
        match std::mem::replace(&mut self.state, LoginState::Done) {
            LoginState::Initial => match data {
                // initial response carries the username
                Some(data) => {
                    let username = decode(data)?;
                    self.state = LoginState::AwaitingPassword { username };
                    Ok(AuthStatus::Continue(encode("Password:")))
                }
                None => {
                    self.state = LoginState::AwaitingUsername;
                    Ok(AuthStatus::Continue(encode("Username:")))
                }
            },
            LoginState::AwaitingUsername => {
                let username = decode(data.unwrap_or_default())?;
                self.state = LoginState::AwaitingPassword { username };
                Ok(AuthStatus::Continue(encode("Password:")))
            }
            LoginState::AwaitingPassword { username } => {
                let password = decode(data.unwrap_or_default())?;
                let credentials = Credentials::UsernameAndPassword { username, password };
                let status = validate(connection, &credentials).await?;
                self.credentials = Some(credentials);
                Ok(status)
            }
            LoginState::Done => Ok(AuthStatus::Failed),
        }
    }

    fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}
