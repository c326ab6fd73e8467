use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Serializer, Value};
use thiserror::Error;

use crate::api::ApiError;

/// Something the bot says back in the room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub body: String,
    pub html: bool,
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Reply {
        Reply {
            body: body.into(),
            html: false,
        }
    }

    pub fn html(body: impl Into<String>) -> Reply {
        Reply {
            body: body.into(),
            html: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}', expected one of {{token}}, {{reg_url}}, {{reg_page}} or {{expiration}}")]
    UnknownPlaceholder(String),
    #[error("unmatched '{brace}' at byte {offset}, write '{brace}{brace}' for a literal brace")]
    UnmatchedBrace { brace: char, offset: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placeholder {
    Token,
    RegUrl,
    RegPage,
    Expiration,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Placeholder> {
        match name {
            "token" => Some(Placeholder::Token),
            "reg_url" => Some(Placeholder::RegUrl),
            "reg_page" => Some(Placeholder::RegPage),
            "expiration" => Some(Placeholder::Expiration),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// What a freshly generated invite gets announced with.
#[derive(Clone, Copy, Debug)]
pub struct InviteDetails<'a> {
    pub token: &'a str,
    pub reg_url: &'a str,
    pub reg_page: &'a str,
    pub expiration_days: u64,
}

/// The operator's custom `message`, checked once when the config is loaded.
///
/// `{token}`, `{reg_url}`, `{reg_page}` and `{expiration}` are replaced,
/// `{{` and `}}` stand for literal braces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageTemplate {
    segments: Vec<Segment>,
}

impl MessageTemplate {
    pub fn parse(template: &str) -> Result<MessageTemplate, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::UnmatchedBrace { brace: '{', offset });
                    }

                    let field = Placeholder::from_name(name.trim())
                        .ok_or(TemplateError::UnknownPlaceholder(name))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(TemplateError::UnmatchedBrace { brace: '}', offset }),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(MessageTemplate { segments })
    }

    pub fn render(&self, details: &InviteDetails<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Field(Placeholder::Token) => out.push_str(details.token),
                Segment::Field(Placeholder::RegUrl) => out.push_str(details.reg_url),
                Segment::Field(Placeholder::RegPage) => out.push_str(details.reg_page),
                Segment::Field(Placeholder::Expiration) => {
                    out.push_str(&details.expiration_days.to_string())
                }
            }
        }
        out
    }
}

pub fn default_invite_message(details: &InviteDetails<'_>) -> String {
    [
        format!("Invitation token <b>{}</b> created!", details.token),
        String::new(),
        "Your unique url for registering is:".to_string(),
        format!(
            "{}{}?token={}",
            details.reg_url, details.reg_page, details.token
        ),
        format!(
            "This invite token will expire in {} days.",
            details.expiration_days
        ),
        "If it expires before use, you must request a new token.".to_string(),
    ]
    .join("<br />")
}

pub fn invite_created(template: Option<&MessageTemplate>, details: &InviteDetails<'_>) -> Reply {
    match template {
        Some(t) => Reply::html(t.render(details)),
        None => Reply::html(default_invite_message(details)),
    }
}

/// JSON with four-space indentation.
pub fn pretty_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));

    match value.serialize(&mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

pub fn json_block(value: &Value) -> Reply {
    Reply::html(format!(
        "<pre><code format=json>{}</code></pre>",
        pretty_json(value)
    ))
}

pub fn token_status(token: &str, value: &Value) -> Reply {
    Reply::html(format!(
        "Status of token {}: \n<pre><code format=json>{}</code></pre>",
        token,
        pretty_json(value)
    ))
}

pub fn permission_denied() -> Reply {
    Reply::text("You don't have permission to manage invitations for this server.")
}

pub fn missing_token(action: &str) -> Reply {
    Reply::text(format!("you must supply a token to {}", action))
}

pub fn request_failed(err: &ApiError) -> Reply {
    match err.body() {
        Some(body) => Reply::text(format!("request failed: {}\n{}", err, body)),
        None => Reply::text(format!("request failed: {}", err)),
    }
}

pub fn generate_failed(err: &ApiError) -> Reply {
    match err {
        ApiError::MissingField { body, .. } => Reply::text(format!(
            "I got a bad response back, sorry, something is borked. \n{}",
            body
        )),
        ApiError::BadResponse { status, body, .. } | ApiError::InvalidJson { status, body, .. } => {
            Reply::html(format!(
                "Uh oh! I got a {} response from your registration endpoint:<br />{}<br />which prompted me to produce this error:<br /><code>{}</code>",
                status.as_u16(),
                body,
                err
            ))
        }
        ApiError::UnreadableBody { status, .. } => Reply::html(format!(
            "Uh oh! I got a {} response from your registration endpoint, which prompted me to produce this error:<br /><code>{}</code>",
            status.as_u16(),
            err
        )),
        ApiError::FailedToConnect { .. } | ApiError::InvalidEndpoint { .. } => Reply::html(format!(
            "Uh oh! I couldn't reach your registration endpoint, which prompted me to produce this error:<br /><code>{}</code>",
            err
        )),
    }
}
