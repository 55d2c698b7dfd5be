//! Space-delimited text protocol spoken over the game socket.
//!
//! Every message is a tag followed by a fixed sequence of fields for that
//! tag. Receivers read tokens left to right and ignore anything trailing.

use std::fmt;
use std::str::{FromStr, SplitAsciiWhitespace};

use thiserror::Error;

use crate::types::{Category, PlayerId, Rect, TileId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    #[error("{tag}: missing field `{field}`")]
    MissingField {
        tag: &'static str,
        field: &'static str,
    },

    #[error("{tag}: invalid value `{value}` for field `{field}`")]
    InvalidField {
        tag: &'static str,
        field: &'static str,
        value: String,
    },
}

/// Client to server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    KeyDown(u32),
    KeyUp(u32),
}

/// Server to client.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// "You are this player."
    YouAre(PlayerId),
    NewPlayer(PlayerId),
    PlayerUpdate(PlayerId, Rect),
    KillPlayer(PlayerId),
    NewTile {
        id: TileId,
        render_class: String,
        category: Category,
    },
    TileUpdate(TileId, Rect),
    RemoveTile(TileId),
    Score(PlayerId, i64),
}

impl ServerMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            ServerMessage::YouAre(_) => "RP",
            ServerMessage::NewPlayer(_) => "NP",
            ServerMessage::PlayerUpdate(..) => "PU",
            ServerMessage::KillPlayer(_) => "KP",
            ServerMessage::NewTile { .. } => "NB",
            ServerMessage::TileUpdate(..) => "BU",
            ServerMessage::RemoveTile(_) => "RB",
            ServerMessage::Score(..) => "SC",
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        match self {
            ServerMessage::YouAre(id)
            | ServerMessage::NewPlayer(id)
            | ServerMessage::KillPlayer(id) => write!(f, "{tag} {id}"),
            ServerMessage::PlayerUpdate(id, rect) => write_rect(f, tag, id, rect),
            ServerMessage::TileUpdate(id, rect) => write_rect(f, tag, id, rect),
            ServerMessage::NewTile {
                id,
                render_class,
                category,
            } => write!(f, "{tag} {id} {render_class} {category}"),
            ServerMessage::RemoveTile(id) => write!(f, "{tag} {id}"),
            ServerMessage::Score(id, score) => write!(f, "{tag} {id} {score}"),
        }
    }
}

impl fmt::Display for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::KeyDown(key) => write!(f, "KD {key}"),
            ClientMessage::KeyUp(key) => write!(f, "KU {key}"),
        }
    }
}

fn write_rect(
    f: &mut fmt::Formatter<'_>,
    tag: &str,
    id: &dyn fmt::Display,
    rect: &Rect,
) -> fmt::Result {
    write!(
        f,
        "{tag} {id} {} {} {} {}",
        rect.x, rect.y, rect.width, rect.height
    )
}

struct Tokens<'a> {
    tag: &'static str,
    inner: SplitAsciiWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn read(&mut self, field: &'static str) -> Result<&'a str, ProtocolError> {
        self.inner.next().ok_or(ProtocolError::MissingField {
            tag: self.tag,
            field,
        })
    }

    fn parse<T: FromStr>(&mut self, field: &'static str) -> Result<T, ProtocolError> {
        let raw = self.read(field)?;
        raw.parse().map_err(|_| ProtocolError::InvalidField {
            tag: self.tag,
            field,
            value: raw.to_string(),
        })
    }

    fn finite(&mut self, field: &'static str) -> Result<f64, ProtocolError> {
        let value: f64 = self.parse(field)?;
        if !value.is_finite() {
            return Err(ProtocolError::InvalidField {
                tag: self.tag,
                field,
                value: value.to_string(),
            });
        }
        Ok(value)
    }

    fn rect(&mut self) -> Result<Rect, ProtocolError> {
        Ok(Rect::new(
            self.finite("x")?,
            self.finite("y")?,
            self.finite("w")?,
            self.finite("h")?,
        ))
    }
}

fn split_tag(raw: &str) -> Result<(&str, SplitAsciiWhitespace<'_>), ProtocolError> {
    let mut inner = raw.split_ascii_whitespace();
    let tag = inner.next().ok_or(ProtocolError::Empty)?;
    Ok((tag, inner))
}

pub fn parse_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    let (tag, inner) = split_tag(raw)?;
    match tag {
        "KD" => {
            let mut tokens = Tokens { tag: "KD", inner };
            Ok(ClientMessage::KeyDown(tokens.parse("keyCode")?))
        }
        "KU" => {
            let mut tokens = Tokens { tag: "KU", inner };
            Ok(ClientMessage::KeyUp(tokens.parse("keyCode")?))
        }
        other => Err(ProtocolError::UnknownTag(other.to_string())),
    }
}

pub fn parse_server_message(raw: &str) -> Result<ServerMessage, ProtocolError> {
    let (tag, inner) = split_tag(raw)?;
    let tag: &'static str = match tag {
        "RP" => "RP",
        "NP" => "NP",
        "PU" => "PU",
        "KP" => "KP",
        "NB" => "NB",
        "BU" => "BU",
        "RB" => "RB",
        "SC" => "SC",
        other => return Err(ProtocolError::UnknownTag(other.to_string())),
    };
    let mut tokens = Tokens { tag, inner };
    let message = match tag {
        "RP" => ServerMessage::YouAre(PlayerId(tokens.parse("playerId")?)),
        "NP" => ServerMessage::NewPlayer(PlayerId(tokens.parse("playerId")?)),
        "PU" => {
            let id = PlayerId(tokens.parse("playerId")?);
            ServerMessage::PlayerUpdate(id, tokens.rect()?)
        }
        "KP" => ServerMessage::KillPlayer(PlayerId(tokens.parse("playerId")?)),
        "NB" => {
            let id = TileId(tokens.parse("tileId")?);
            let render_class = tokens.read("renderCategory")?.to_string();
            let raw_category = tokens.read("semanticCategory")?;
            let category =
                Category::parse(raw_category).ok_or_else(|| ProtocolError::InvalidField {
                    tag,
                    field: "semanticCategory",
                    value: raw_category.to_string(),
                })?;
            ServerMessage::NewTile {
                id,
                render_class,
                category,
            }
        }
        "BU" => {
            let id = TileId(tokens.parse("tileId")?);
            ServerMessage::TileUpdate(id, tokens.rect()?)
        }
        "RB" => ServerMessage::RemoveTile(TileId(tokens.parse("tileId")?)),
        _ => {
            let id = PlayerId(tokens.parse("playerId")?);
            ServerMessage::Score(id, tokens.parse("score")?)
        }
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_down_and_up() {
        assert_eq!(parse_client_message("KD 37"), Ok(ClientMessage::KeyDown(37)));
        assert_eq!(parse_client_message("KU 67"), Ok(ClientMessage::KeyUp(67)));
        assert_eq!(
            parse_client_message("KD 39 trailing junk"),
            Ok(ClientMessage::KeyDown(39))
        );
    }

    #[test]
    fn parse_client_rejects_unknown_and_malformed() {
        assert_eq!(parse_client_message(""), Err(ProtocolError::Empty));
        assert_eq!(
            parse_client_message("CH hello"),
            Err(ProtocolError::UnknownTag("CH".to_string()))
        );
        assert_eq!(
            parse_client_message("KD"),
            Err(ProtocolError::MissingField {
                tag: "KD",
                field: "keyCode"
            })
        );
        assert!(matches!(
            parse_client_message("KU left"),
            Err(ProtocolError::InvalidField { tag: "KU", .. })
        ));
    }

    #[test]
    fn server_messages_use_compact_numbers() {
        let update =
            ServerMessage::PlayerUpdate(PlayerId(3), Rect::new(-100.0, 12.5, 50.0, 100.0));
        assert_eq!(update.to_string(), "PU 3 -100 12.5 50 100");

        let tile = ServerMessage::NewTile {
            id: TileId(7),
            render_class: "coin".to_string(),
            category: Category::TenCoin,
        };
        assert_eq!(tile.to_string(), "NB 7 coin tencoin");
        assert_eq!(ServerMessage::Score(PlayerId(1), 60).to_string(), "SC 1 60");
    }

    #[test]
    fn server_message_text_parses_back() {
        let messages = [
            ServerMessage::YouAre(PlayerId(2)),
            ServerMessage::TileUpdate(TileId(4), Rect::new(0.1, -3.0, 25.0, 25.0)),
            ServerMessage::NewTile {
                id: TileId(9),
                render_class: "lava".to_string(),
                category: Category::Hazard,
            },
            ServerMessage::RemoveTile(TileId(9)),
        ];
        for message in messages {
            assert_eq!(parse_server_message(&message.to_string()), Ok(message));
        }
    }

    #[test]
    fn parse_server_rejects_non_finite_geometry() {
        assert!(matches!(
            parse_server_message("BU 1 NaN 0 50 50"),
            Err(ProtocolError::InvalidField { field: "x", .. })
        ));
        assert!(matches!(
            parse_server_message("NB 1 normal lava"),
            Err(ProtocolError::InvalidField {
                field: "semanticCategory",
                ..
            })
        ));
    }
}
