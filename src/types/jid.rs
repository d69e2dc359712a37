use std::fmt;
use std::str::FromStr;

/// Known JID servers on WhatsApp.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const HIDDEN_USER_SERVER: &str = "lid";

/// JID represents a WhatsApp user/entity ID (user@server, optionally with a
/// device suffix as in `user@server:device`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub raw_agent: u8,
    pub device: u16,
    pub server: String,
}

impl Jid {
    /// New regular JID (user@server).
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            raw_agent: 0,
            device: 0,
            server: server.into(),
        }
    }

    /// New AD-JID (user:device@server) for device-specific addressing.
    pub fn new_ad(user: impl Into<String>, device: u16, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            raw_agent: 0,
            device,
            server: server.into(),
        }
    }

    /// JID without agent/device (regular user@server).
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            raw_agent: 0,
            device: 0,
            server: self.server.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// Hidden-user (LID server) alias of this JID. Only meaningful for JIDs on
    /// the default user server; a given account may present either form in
    /// mention lists.
    pub fn lid_alias(&self) -> Option<Jid> {
        if self.server == DEFAULT_USER_SERVER && !self.user.is_empty() {
            Some(Jid::new(self.user.clone(), HIDDEN_USER_SERVER))
        } else {
            None
        }
    }

    /// Tolerant parse of a stored JID string. A string without a server marker
    /// gets the default user server appended; an empty user part resolves to
    /// `None` (a lookup miss, not a failure).
    ///
    /// Idempotent: normalizing the string form of a normalized JID yields the
    /// same JID.
    pub fn normalize_stored(s: &str) -> Option<Jid> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let with_server = if s.contains('@') {
            s.to_string()
        } else {
            format!("{s}@{DEFAULT_USER_SERVER}")
        };
        match Jid::from_str(&with_server) {
            Ok(jid) if !jid.user.is_empty() => Some(jid),
            _ => None,
        }
    }
}

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('@').collect();
        if parts.len() == 1 {
            return Ok(Self::new("", parts[0]));
        }
        if parts.len() != 2 {
            return Err(JidParseError);
        }
        // The device suffix may live on either side of the '@' in stored
        // strings (user:device@server or user@server:device).
        let (server, mut device) = match parts[1].split_once(':') {
            Some((srv, dev)) => (srv, dev.parse().map_err(|_| JidParseError)?),
            None => (parts[1], 0u16),
        };
        let mut raw_agent = 0u8;
        let user = if let Some((u, rest)) = parts[0].split_once('.') {
            let ad: Vec<&str> = rest.split(':').collect();
            raw_agent = ad[0].parse().map_err(|_| JidParseError)?;
            if ad.len() == 2 {
                device = ad[1].parse().map_err(|_| JidParseError)?;
            }
            u
        } else if let Some((u, d)) = parts[0].split_once(':') {
            device = d.parse().map_err(|_| JidParseError)?;
            u
        } else {
            parts[0]
        };
        Ok(Self {
            user: user.to_string(),
            raw_agent,
            device,
            server: server.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct JidParseError;

impl fmt::Display for JidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid JID format")
    }
}

impl std::error::Error for JidParseError {}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw_agent > 0 {
            write!(
                f,
                "{}.{}:{}@{}",
                self.user, self.raw_agent, self.device, self.server
            )
        } else if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

impl serde::Serialize for Jid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Jid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Jid::from_str(&s).map_err(serde::de::Error::custom)
    }
}
