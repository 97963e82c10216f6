use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::models::{ServerEvent, UserOut};
use crate::services::auth_service::AuthContext;

/// Item queued for a client channel
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Close the channel after flushing what is queued before it
    Close,
}

pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// What the transport knows about a freshly opened channel
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub outbox: Outbox,
    pub address: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub credentials: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub outbox: Outbox,
    pub address: String,
    pub user_agent: Option<String>,
    pub credentials: Option<String>,
    /// Note this channel was opened for, when the referer named a valid one
    pub note_id: Option<String>,
    pub color: String,
    pub cursor: Option<Value>,
    pub idle: bool,
    pub kind: Option<String>,
    pub login: bool,
    pub user_id: Option<String>,
    pub name: String,
}

impl Session {
    pub fn bind_identity(&mut self, auth: &AuthContext) {
        if auth.logged_in {
            self.login = true;
            self.user_id = auth.user_id.clone();
            self.name = auth
                .display_name
                .clone()
                .or_else(|| auth.user_id.clone())
                .unwrap_or_else(guest_name);
        } else {
            self.login = false;
            self.user_id = None;
            self.name = guest_name();
        }
    }

    pub fn user_out(&self) -> UserOut {
        UserOut {
            id: self.id.clone(),
            login: self.login,
            userid: self.user_id.clone(),
            color: self.color.clone(),
            cursor: self.cursor.clone(),
            name: self.name.clone(),
            idle: self.idle,
            kind: self.kind.clone(),
        }
    }

    pub fn send(&self, event: ServerEvent) -> bool {
        self.outbox.send(Outbound::Event(event)).is_ok()
    }
}

/// Every connected channel, attached or not
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        channel: Channel,
        note_id: Option<String>,
        auth: &AuthContext,
        taken_colors: &HashSet<String>,
        max_color_retries: u32,
    ) -> Session {
        let mut session = Session {
            id: channel.id,
            outbox: channel.outbox,
            address: channel.address,
            user_agent: channel.user_agent,
            credentials: channel.credentials,
            note_id,
            color: pick_color(taken_colors, max_color_retries),
            cursor: None,
            idle: false,
            kind: None,
            login: false,
            user_id: None,
            name: String::new(),
        };
        session.bind_identity(auth);

        debug!(
            "Registered session {} as '{}' from {} ({})",
            session.id,
            session.name,
            session.address,
            session.user_agent.as_deref().unwrap_or("unknown agent")
        );
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    pub async fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Apply `f` to the session and return its presence afterwards.
    pub async fn update<F>(&self, id: &str, f: F) -> Option<UserOut>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id)?;
        f(session);
        Some(session.user_out())
    }

    pub async fn send(&self, id: &str, event: ServerEvent) -> bool {
        match self.sessions.read().await.get(id) {
            Some(session) => session.send(event),
            None => false,
        }
    }

    pub async fn close(&self, id: &str) {
        if let Some(session) = self.sessions.read().await.get(id) {
            let _ = session.outbox.send(Outbound::Close);
        }
    }

    /// Presence of the given sessions, in the given order, skipping unknown ids.
    pub async fn user_outs<'a, I>(&self, ids: I) -> Vec<UserOut>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let sessions = self.sessions.read().await;
        ids.into_iter()
            .filter_map(|id| sessions.get(id))
            .map(Session::user_out)
            .collect()
    }

    pub async fn colors_of<'a, I>(&self, ids: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let sessions = self.sessions.read().await;
        ids.into_iter()
            .filter_map(|id| sessions.get(id))
            .map(|s| s.color.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// (online, distinct addresses, signed in, distinct signed-in addresses)
    pub async fn presence_counts(&self) -> (usize, usize, usize, usize) {
        let sessions = self.sessions.read().await;
        let mut addresses = HashSet::new();
        let mut registered = 0;
        let mut registered_addresses = HashSet::new();
        for session in sessions.values() {
            addresses.insert(session.address.as_str());
            if session.login {
                registered += 1;
                registered_addresses.insert(session.address.as_str());
            }
        }
        (sessions.len(), addresses.len(), registered, registered_addresses.len())
    }
}

/// A light color not in `taken`, giving up after `max_retries` redraws.
pub fn pick_color(taken: &HashSet<String>, max_retries: u32) -> String {
    pick_color_with(taken, max_retries, random_light_color)
}

/// Draw until the color is free or `max_retries` redraws are spent; the last
/// draw wins either way.
fn pick_color_with(
    taken: &HashSet<String>,
    max_retries: u32,
    mut draw: impl FnMut() -> String,
) -> String {
    let mut color = draw();
    let mut retries = 0;
    while taken.contains(&color) && retries < max_retries {
        color = draw();
        retries += 1;
    }
    color
}

fn random_light_color() -> String {
    let mut rng = rand::thread_rng();
    let hue: f64 = rng.gen_range(0.0..360.0);
    let saturation: f64 = rng.gen_range(0.55..0.95);
    let lightness: f64 = rng.gen_range(0.70..0.85);
    let (r, g, b) = hsl_to_rgb(hue, saturation, lightness);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (channel(r1), channel(g1), channel(b1))
}

const GUEST_SURNAMES: &[&str] = &[
    "Abbott", "Barnes", "Carver", "Dalton", "Ellison", "Fischer", "Garner", "Hale", "Ingram",
    "Jensen", "Keller", "Lambert", "Mercer", "Nolan", "Osborne", "Porter", "Quinn", "Rowe",
    "Sawyer", "Thorne", "Underwood", "Vance", "Walsh", "Yates", "Zimmerman",
];

pub fn guest_name() -> String {
    let surname = GUEST_SURNAMES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("Anonymous");
    format!("Guest {}", surname)
}
