use crate::cloudflare::Credentials;
use crate::crd::credentials::{AuthKind, Credentials as CredentialsCrd};

#[derive(Clone, Debug)]
pub struct Auth {
    pub account_id: String,
    pub credentials: Credentials,
}

impl From<CredentialsCrd> for Auth {
    fn from(s: CredentialsCrd) -> Auth {
        let account_id = s.spec.account_id;
        let credentials = match s.spec.auth {
            AuthKind::ServiceKey(key) => Credentials::Service { key },
            AuthKind::UserAuthKey { email, key } => Credentials::UserAuthKey { email, key },
            AuthKind::UserAuthToken(token) => Credentials::UserAuthToken { token },
        };

        Auth {
            account_id,
            credentials,
        }
    }
}
