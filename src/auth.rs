//! Authentication and authorization gates.
//!
//! The authenticator turns a request into an optional principal (or a
//! 401 challenge); the authorizer decides whether that principal may
//! perform an action on a path. A Basic provider over SHA-256 hashed
//! credentials is bundled; both traits accept custom implementations.

use std::collections::HashMap;

use base64::Engine as _;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::Request;
use sha2::{Digest, Sha256};

use crate::util::DavMethod;

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
}

/// What a method is about to do, for authorization purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Lock,
}

/// Map a method to its action. Unknown methods authorize as reads; they
/// are rejected with 405 right after the gates anyway.
pub fn action_for(method: Option<DavMethod>) -> Action {
    match method {
        Some(DavMethod::Get)
        | Some(DavMethod::Head)
        | Some(DavMethod::PropFind)
        | Some(DavMethod::Options) => Action::Read,
        Some(DavMethod::Lock) | Some(DavMethod::Unlock) => Action::Lock,
        Some(_) => Action::Write,
        None => Action::Read,
    }
}

pub type AuthFuture<'a, T> = BoxFuture<'a, T>;

/// Credential check. `Ok(None)` means anonymous access was granted.
pub trait Authenticator: Send + Sync {
    /// `Err(())` produces a 401 carrying `challenge()`.
    fn authenticate<'a>(
        &'a self,
        req: &'a Request<()>,
    ) -> AuthFuture<'a, Result<Option<Principal>, ()>>;

    fn challenge(&self) -> String {
        "Basic realm=\"webdav\"".to_string()
    }
}

/// Access decision. `Err(reason)` produces a 403 with the reason body.
pub trait Authorizer: Send + Sync {
    fn authorize<'a>(
        &'a self,
        user: Option<&'a Principal>,
        action: Action,
        path: &'a str,
    ) -> AuthFuture<'a, Result<(), String>>;
}

/// Pass-through authenticator used when anonymous access is allowed.
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn authenticate<'a>(
        &'a self,
        _req: &'a Request<()>,
    ) -> AuthFuture<'a, Result<Option<Principal>, ()>> {
        async { Ok(None) }.boxed()
    }
}

/// Deny-all authenticator used when anonymous access is disallowed and
/// no authenticator was configured.
pub struct DenyAllAuthenticator;

impl Authenticator for DenyAllAuthenticator {
    fn authenticate<'a>(
        &'a self,
        _req: &'a Request<()>,
    ) -> AuthFuture<'a, Result<Option<Principal>, ()>> {
        async { Err(()) }.boxed()
    }
}

/// Authorizer that permits everything.
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn authorize<'a>(
        &'a self,
        _user: Option<&'a Principal>,
        _action: Action,
        _path: &'a str,
    ) -> AuthFuture<'a, Result<(), String>> {
        async { Ok(()) }.boxed()
    }
}

// Byte-wise comparison without an early exit, so timing does not leak
// how much of the digest matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Basic authentication over a static user table. Passwords are stored
/// as SHA-256 digests of the plaintext.
pub struct BasicAuthenticator {
    realm: String,
    users: HashMap<String, [u8; 32]>,
}

impl BasicAuthenticator {
    pub fn new(realm: impl Into<String>) -> BasicAuthenticator {
        BasicAuthenticator {
            realm: realm.into(),
            users: HashMap::new(),
        }
    }

    pub fn add_user(mut self, user: impl Into<String>, password: &str) -> Self {
        let digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        self.users.insert(user.into(), digest);
        self
    }

    fn verify(&self, header: &str) -> Option<Principal> {
        let b64 = header.strip_prefix("Basic ")?;
        let decoded = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
        let creds = String::from_utf8(decoded).ok()?;
        let (user, pass) = creds.split_once(':')?;
        let stored = self.users.get(user)?;
        let digest: [u8; 32] = Sha256::digest(pass.as_bytes()).into();
        if constant_time_eq(stored, &digest) {
            Some(Principal {
                name: user.to_string(),
            })
        } else {
            None
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate<'a>(
        &'a self,
        req: &'a Request<()>,
    ) -> AuthFuture<'a, Result<Option<Principal>, ()>> {
        async move {
            let header = req
                .headers()
                .get(http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(())?;
            match self.verify(header) {
                Some(principal) => Ok(Some(principal)),
                None => Err(()),
            }
        }
        .boxed()
    }

    fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }
}
