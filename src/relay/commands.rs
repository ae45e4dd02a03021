//! Canned commands.
//!
//! Matching is exact: no trimming, no case folding, no prefix matching. A
//! completion that happens to echo "/start " or "/Start" is plain text.

/// Reply to `/start`. Sent with HTML parse mode.
pub const WELCOME_MESSAGE: &str = "<b>Olá! Eu sou o BRO.AI</b> 🤖\n\n\
Sou seu assistente para dúvidas de gestão e finanças do seu negócio: \
CMV, margem, precificação, fluxo de caixa e muito mais.\n\n\
É só mandar sua pergunta por aqui.";

/// Reply to `/help`. Sent with HTML parse mode.
pub const HELP_MESSAGE: &str = "<b>Como usar</b>\n\n\
Envie uma pergunta em texto e eu respondo em seguida.\n\
Exemplos: <i>CMV o que é?</i>, <i>Como calcular minha margem de lucro?</i>\n\n\
/start - apresentação\n\
/help - esta ajuda";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "/start" => Some(Command::Start),
            "/help" => Some(Command::Help),
            _ => None,
        }
    }

    pub fn reply(&self) -> &'static str {
        match self {
            Command::Start => WELCOME_MESSAGE,
            Command::Help => HELP_MESSAGE,
        }
    }
}

/// What to do with an inbound text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send a fixed reply, bypassing the completion provider.
    Canned(&'static str),
    /// Ask the completion provider.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub is_command: bool,
    pub action: Action,
}

pub fn route(text: &str) -> Route {
    match Command::parse(text) {
        Some(cmd) => Route {
            is_command: true,
            action: Action::Canned(cmd.reply()),
        },
        None => Route {
            is_command: false,
            action: Action::Complete,
        },
    }
}
