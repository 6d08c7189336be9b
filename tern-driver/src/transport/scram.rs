//! SCRAM-SHA-256 authentication (RFC 5802, RFC 7677).
//!
//! The conversation is carried by the `saslStart` and `saslContinue`
//! commands against the credentials' source database.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tern_bson::{Binary, Document, Value, doc};
use tracing::debug;

use super::TransportError;

type HmacSha256 = Hmac<Sha256>;

/// Mechanism name sent to the server.
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Fewest PBKDF2 iterations accepted from a server.
pub const MIN_ITERATIONS: u32 = 4096;

const GS2_HEADER: &str = "n,,";

/// Username, password and the database that holds the user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub source: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TransportError::authentication(format!("HMAC key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// PBKDF2-HMAC-SHA-256 with a single output block.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>, TransportError> {
    let mut block = salt.to_vec();
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac(password, &block)?;
    let mut result = u.clone();
    for _ in 1..iterations {
        u = hmac(password, &u)?;
        for (r, x) in result.iter_mut().zip(&u) {
            *r ^= x;
        }
    }
    Ok(result)
}

/// Escape `=` and `,` in a username.
fn sasl_name(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn attribute<'a>(message: &'a str, name: char) -> Option<&'a str> {
    message.split(',').find_map(|part| {
        let mut chars = part.chars();
        match (chars.next(), chars.next()) {
            (Some(c), Some('=')) if c == name => Some(&part[2..]),
            _ => None,
        }
    })
}

/// Client side of one SCRAM-SHA-256 exchange.
pub struct ScramConversation {
    username: String,
    password: String,
    client_nonce: String,
    auth_message: Option<String>,
    salted_password: Option<Vec<u8>>,
}

impl ScramConversation {
    /// Start a conversation with a random nonce.
    pub fn new(username: &str, password: &str) -> Self {
        let mut nonce = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::with_nonce(username, password, &STANDARD.encode(nonce))
    }

    /// Start a conversation with a fixed nonce.
    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", sasl_name(&self.username), self.client_nonce)
    }

    /// The client-first message.
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Answer the server-first message with the client-final message.
    pub fn client_final(&mut self, server_first: &str) -> Result<String, TransportError> {
        let nonce = attribute(server_first, 'r')
            .ok_or_else(|| TransportError::authentication("SCRAM reply is missing the nonce"))?;
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(TransportError::authentication(
                "SCRAM server nonce does not extend the client nonce",
            ));
        }
        let salt = attribute(server_first, 's')
            .and_then(|s| STANDARD.decode(s).ok())
            .ok_or_else(|| TransportError::authentication("SCRAM reply has an invalid salt"))?;
        let iterations: u32 = attribute(server_first, 'i')
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| {
                TransportError::authentication("SCRAM reply has an invalid iteration count")
            })?;
        if iterations < MIN_ITERATIONS {
            return Err(TransportError::authentication(format!(
                "SCRAM iteration count {} is below the minimum of {}",
                iterations, MIN_ITERATIONS
            )));
        }

        let salted_password = hi(self.password.as_bytes(), &salt, iterations)?;
        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);

        let channel_binding = STANDARD.encode(GS2_HEADER);
        let without_proof = format!("c={},r={}", channel_binding, nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&signature)
            .map(|(k, s)| k ^ s)
            .collect();

        self.auth_message = Some(auth_message);
        self.salted_password = Some(salted_password);
        Ok(format!("{},p={}", without_proof, STANDARD.encode(proof)))
    }

    /// Check the server's signature in the server-final message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), TransportError> {
        if let Some(error) = attribute(server_final, 'e') {
            return Err(TransportError::authentication(format!(
                "SCRAM server error: {}",
                error
            )));
        }
        let (Some(auth_message), Some(salted_password)) =
            (&self.auth_message, &self.salted_password)
        else {
            return Err(TransportError::authentication(
                "SCRAM server-final received before client-final",
            ));
        };

        let server_key = hmac(salted_password, b"Server Key")?;
        let expected = STANDARD.encode(hmac(&server_key, auth_message.as_bytes())?);
        match attribute(server_final, 'v') {
            Some(signature) if signature == expected => Ok(()),
            _ => Err(TransportError::authentication(
                "SCRAM server signature is invalid",
            )),
        }
    }
}

fn payload_text(reply: &Document) -> Result<String, TransportError> {
    match reply.get("payload") {
        Some(Value::Binary(binary)) => String::from_utf8(binary.bytes.clone())
            .map_err(|_| TransportError::authentication("SCRAM payload is not UTF-8")),
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(TransportError::authentication("SCRAM reply has no payload")),
    }
}

fn check_reply(reply: Document) -> Result<Document, TransportError> {
    if reply.get("ok").is_some_and(Value::is_truthy) {
        return Ok(reply);
    }
    let message = reply
        .get_str("errmsg")
        .unwrap_or("Authentication failed")
        .to_string();
    Err(TransportError::authentication(message))
}

/// Run a SCRAM-SHA-256 exchange.
///
/// `run` sends a command to the credentials' source database and returns
/// the decoded reply.
pub fn authenticate(
    credentials: &Credentials,
    mut run: impl FnMut(&Document) -> Result<Document, TransportError>,
) -> Result<(), TransportError> {
    let mut conversation = ScramConversation::new(&credentials.username, &credentials.password);
    debug!(
        username = %credentials.username,
        source = %credentials.source,
        mechanism = MECHANISM,
        "Authenticating"
    );

    let start = doc! {
        "saslStart" => 1,
        "mechanism" => MECHANISM,
        "payload" => Binary::generic(conversation.client_first().into_bytes()),
        "autoAuthorize" => 1,
        "options" => doc! { "skipEmptyExchange" => true },
    };
    let reply = check_reply(run(&start)?)?;
    let conversation_id = reply.get("conversationId").cloned().unwrap_or(Value::Int32(1));

    let client_final = conversation.client_final(&payload_text(&reply)?)?;
    let reply = check_reply(run(&doc! {
        "saslContinue" => 1,
        "conversationId" => conversation_id.clone(),
        "payload" => Binary::generic(client_final.into_bytes()),
    })?)?;
    conversation.verify_server_final(&payload_text(&reply)?)?;

    let mut done = reply.find_as_bool("done", false);
    while !done {
        let reply = check_reply(run(&doc! {
            "saslContinue" => 1,
            "conversationId" => conversation_id.clone(),
            "payload" => Binary::generic(Vec::new()),
        })?)?;
        done = reply.find_as_bool("done", false);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exchange from RFC 7677 section 3.
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn test_rfc7677_exchange() {
        let mut conversation = ScramConversation::with_nonce("user", "pencil", NONCE);
        assert_eq!(conversation.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
        assert_eq!(conversation.client_final(SERVER_FIRST).unwrap(), CLIENT_FINAL);
        conversation.verify_server_final(SERVER_FINAL).unwrap();
    }

    #[test]
    fn test_bad_server_signature() {
        let mut conversation = ScramConversation::with_nonce("user", "pencil", NONCE);
        conversation.client_final(SERVER_FIRST).unwrap();
        let err = conversation.verify_server_final("v=AAAA").unwrap_err();
        assert_eq!(err.message, "SCRAM server signature is invalid");

        let err = conversation.verify_server_final("e=other-error").unwrap_err();
        assert!(err.message.contains("other-error"));
    }

    #[test]
    fn test_server_nonce_must_extend_client_nonce() {
        let mut conversation = ScramConversation::with_nonce("user", "pencil", "abc");
        assert!(conversation.client_final("r=xyz,s=AAAA,i=4096").is_err());
        assert!(conversation.client_final("r=abc,s=AAAA,i=4096").is_err());
    }

    #[test]
    fn test_low_iteration_count_is_rejected() {
        let mut conversation = ScramConversation::with_nonce("user", "pencil", "abc");
        let err = conversation.client_final("r=abcdef,s=AAAA,i=1000").unwrap_err();
        assert!(err.message.contains("below the minimum"));
    }

    #[test]
    fn test_username_is_escaped() {
        let conversation = ScramConversation::with_nonce("a=b,c", "pw", "n");
        assert_eq!(conversation.client_first(), "n,,n=a=3Db=2Cc,r=n");
    }

    #[test]
    fn test_authenticate_against_scripted_server() {
        let credentials = Credentials {
            username: "user".to_string(),
            password: "pencil".to_string(),
            source: "admin".to_string(),
        };

        let mut sent = Vec::new();
        let err = authenticate(&credentials, |command| {
            sent.push(command.first_key().unwrap_or_default().to_string());
            Ok(doc! { "ok" => 0, "errmsg" => "Authentication failed.", "code" => 18 })
        })
        .unwrap_err();

        assert_eq!(sent, vec!["saslStart"]);
        assert_eq!(err.message, "Authentication failed.");
        assert_eq!(err.code, crate::error::codes::CLIENT_AUTHENTICATE);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "user".to_string(),
            password: "hunter2".to_string(),
            source: "admin".to_string(),
        };
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
