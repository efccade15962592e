//! Conversation memory for one chat.

use crate::models::{ConversationTurn, Role};

/// Ordered turns of one conversation, bounded to the most recent
/// `max_turns`. Older turns fall off the front as new ones arrive, and the
/// window never opens on an assistant reply whose question was dropped.
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: Vec<ConversationTurn>,
    max_turns: usize,
}

impl Session {
    /// `max_turns == 0` keeps no memory at all.
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        if self.max_turns == 0 {
            return;
        }
        self.turns.push(turn);
        if self.turns.len() > self.max_turns {
            let mut excess = self.turns.len() - self.max_turns;
            while excess < self.turns.len() && self.turns[excess].role == Role::Assistant {
                excess += 1;
            }
            self.turns.drain(..excess);
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_turns_in_order() {
        let mut s = Session::new(10);
        s.append(ConversationTurn::user("q1"));
        s.append(ConversationTurn::assistant("a1"));
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.history()[0].role, Role::User);
        assert_eq!(s.history()[1].content, "a1");
    }

    #[test]
    fn drops_oldest_beyond_window() {
        let mut s = Session::new(3);
        for i in 0..5 {
            s.append(ConversationTurn::user(format!("q{}", i)));
        }
        let contents: Vec<&str> = s.history().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn odd_window_drops_whole_exchanges() {
        let mut s = Session::new(3);
        for i in 0..3 {
            s.append(ConversationTurn::user(format!("q{}", i)));
            s.append(ConversationTurn::assistant(format!("a{}", i)));
        }
        let contents: Vec<&str> = s.history().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "a2"]);
        assert_eq!(s.history()[0].role, Role::User);
    }

    #[test]
    fn zero_window_disables_memory() {
        let mut s = Session::new(0);
        s.append(ConversationTurn::user("q"));
        assert!(s.is_empty());
    }

    #[test]
    fn reset_clears_history() {
        let mut s = Session::new(10);
        s.append(ConversationTurn::user("q"));
        s.reset();
        assert!(s.history().is_empty());
    }
}
