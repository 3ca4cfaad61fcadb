use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// Custom IDs of the player control buttons.
pub mod button_ids {
    pub const PREVIOUS: &str = "player_previous";
    pub const STOP: &str = "player_stop";
    pub const NEXT: &str = "player_next";
}

/// What a pressed player button asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerControl {
    Previous,
    Stop,
    Next,
}

impl PlayerControl {
    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        match custom_id {
            button_ids::PREVIOUS => Some(Self::Previous),
            button_ids::STOP => Some(Self::Stop),
            button_ids::NEXT => Some(Self::Next),
            _ => None,
        }
    }
}

/// The ⏮ ⏹ ⏭ row attached to every "now playing" message.
pub fn create_player_buttons() -> Vec<CreateActionRow> {
    let previous_btn = CreateButton::new(button_ids::PREVIOUS)
        .emoji('⏮')
        .style(ButtonStyle::Secondary);

    let stop_btn = CreateButton::new(button_ids::STOP)
        .emoji('⏹')
        .style(ButtonStyle::Danger);

    let next_btn = CreateButton::new(button_ids::NEXT)
        .emoji('⏭')
        .style(ButtonStyle::Secondary);

    vec![CreateActionRow::Buttons(vec![previous_btn, stop_btn, next_btn])]
}
