//! Messages de la conversation
//!
//! `MessageSet` garde les messages dans l'ordre d'insertion, qui est l'ordre
//! d'affichage, avec un accès par id. Un id ne désigne qu'un seul message
//! et ne change jamais.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Message local de l'application (connexion, erreurs)
    Status,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Status => "status",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Ensemble ordonné et indexé des messages
#[derive(Clone, Debug, Default)]
pub struct MessageSet {
    messages: Vec<Message>,
    index: HashMap<String, usize>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute un message en fin de liste
    ///
    /// Retourne `false` sans rien modifier si l'id existe déjà.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.index.contains_key(&message.id) {
            return false;
        }
        self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        true
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&position| &self.messages[position])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Position d'affichage d'un message
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Concatène `delta` au contenu du message
    pub fn append(&mut self, id: &str, delta: &str) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.content.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Remplace le contenu du message, à la même position et avec le même id
    pub fn replace(&mut self, id: &str, content: &str) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.content.clear();
                message.content.push_str(content);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn count_by_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Copie des messages dans l'ordre d'affichage
    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.clone()
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        let position = *self.index.get(id)?;
        self.messages.get_mut(position)
    }
}
