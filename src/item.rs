//! Result items, their actions and the ranked wrapper used during merging.

use std::fmt;
use std::sync::Arc;

/// An action a user can run on an item.
///
/// The function is executed on the main thread on activation. It may tear
/// down the session (and with it the query the item came from), so activation
/// paths must not touch query state after invoking it.
#[derive(Clone)]
pub struct Action {
    /// The action identifier.
    pub id: String,

    /// The action title.
    pub text: String,

    /// The function executed on activation.
    pub function: Arc<dyn Fn() + Send + Sync>,
}

impl Action {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        function: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            function: Arc::new(function),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

/// A displayable result produced by a handler.
///
/// Items are shared by reference (`Arc<dyn Item>`); the longest holder across
/// matches, fallbacks and handler caches keeps them alive.
pub trait Item: Send + Sync {
    /// Identifier, unique per extension.
    fn id(&self) -> String;

    /// Primary display text. Must not be empty; its length is a scoring
    /// divisor.
    fn text(&self) -> String;

    /// Secondary descriptive text.
    fn subtext(&self) -> String {
        String::new()
    }

    /// Icon references, resolved by the front-end.
    fn icon_urls(&self) -> Vec<String> {
        Vec::new()
    }

    /// Input text replacement offered to the user (usually on Tab).
    fn input_action_text(&self) -> String {
        String::new()
    }

    /// The actions a user can choose from.
    fn actions(&self) -> Vec<Action> {
        Vec::new()
    }
}

/// Plain-data [`Item`] implementation backing most handlers.
#[derive(Debug, Clone, Default)]
pub struct StandardItem {
    pub id: String,
    pub text: String,
    pub subtext: String,
    pub icon_urls: Vec<String>,
    pub input_action_text: String,
    pub actions: Vec<Action>,
}

impl StandardItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_subtext(mut self, subtext: impl Into<String>) -> Self {
        self.subtext = subtext.into();
        self
    }

    pub fn with_icon_urls(mut self, icon_urls: Vec<String>) -> Self {
        self.icon_urls = icon_urls;
        self
    }

    pub fn with_input_action_text(mut self, text: impl Into<String>) -> Self {
        self.input_action_text = text.into();
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    pub fn into_item(self) -> Arc<dyn Item> {
        Arc::new(self)
    }
}

impl Item for StandardItem {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn text(&self) -> String {
        self.text.clone()
    }

    fn subtext(&self) -> String {
        self.subtext.clone()
    }

    fn icon_urls(&self) -> Vec<String> {
        self.icon_urls.clone()
    }

    fn input_action_text(&self) -> String {
        self.input_action_text.clone()
    }

    fn actions(&self) -> Vec<Action> {
        self.actions.clone()
    }
}

/// A scored item, used to rank the results of multiple handlers.
///
/// Scores of matches lie in `(0, 1]`; `0.0` marks an item produced for an
/// empty query, which is sortable but not filtered.
#[derive(Clone)]
pub struct RankItem {
    pub item: Arc<dyn Item>,
    pub score: f32,
}

impl RankItem {
    pub fn new(item: Arc<dyn Item>, score: f32) -> Self {
        Self { item, score }
    }
}

impl fmt::Debug for RankItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankItem")
            .field("item", &self.item.id())
            .field("score", &self.score)
            .finish()
    }
}

impl PartialEq for RankItem {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl PartialOrd for RankItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.score.partial_cmp(&other.score)
    }
}
