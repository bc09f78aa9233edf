//! Conversation router
//!
//! Pure transition function keyed on (current step, input kind). It never
//! touches storage or the network; [`super::dialog`] performs the effects of
//! the returned [`Action`].
//!
//! | input                     | no flow            | matching step | other step        |
//! |---------------------------|--------------------|---------------|-------------------|
//! | `Flow(f)`                 | `Enter(f)`         | `Enter(f)`    | `Enter(f)`        |
//! | `Cancel` / `MainMenu`     | `Reset`            | `Reset`       | `Reset`           |
//! | `Balance`                 | `ShowBalance`      | `ShowBalance` | `ShowBalance`     |
//! | currency / network / text | `Ignore` + menu    | `Capture`     | see below         |
//! | `Confirm`                 | `Ignore` + menu    | `Execute`     | `Ignore`          |
//!
//! Text at a selection step is `Reject`ed with a hint, a selection at a text
//! step is `Ignore`d. Neither changes the state.

use super::input::{Input, Selection};
use super::state::{ConversationState, Expect, Flow};
use crate::core_types::Currency;

/// Value captured at the current step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    Currency(Currency),
    Network(String),
    Text(String),
}

/// What the dialog has to do with an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start `Flow` from its first step, dropping every captured field
    Enter(Flow),
    /// Drop the conversation and show the main menu
    Reset,
    ShowBalance,
    Capture(Capture),
    /// Run the operation of a confirm step
    Execute,
    /// Wrong kind of input for the step; state unchanged
    Reject(&'static str),
    Ignore { show_menu: bool },
}

pub fn route(state: Option<&ConversationState>, input: &Input) -> Action {
    match input {
        Input::Select(Selection::Flow(flow)) => return Action::Enter(*flow),
        Input::Select(Selection::Cancel | Selection::MainMenu) => return Action::Reset,
        Input::Select(Selection::Balance) => return Action::ShowBalance,
        _ => {}
    }

    let Some(state) = state else {
        return Action::Ignore { show_menu: true };
    };

    match (state.step.expects(), input) {
        (Expect::CurrencyChoice, Input::Select(Selection::Currency(c))) => {
            Action::Capture(Capture::Currency(c.clone()))
        }
        (Expect::NetworkChoice, Input::Select(Selection::Network(n))) => {
            Action::Capture(Capture::Network(n.clone()))
        }
        (Expect::Text, Input::Text(text)) => Action::Capture(Capture::Text(text.clone())),
        (Expect::Confirmation, Input::Select(Selection::Confirm)) => Action::Execute,

        (Expect::CurrencyChoice, Input::Text(_)) => Action::Reject("Please pick a currency below."),
        (Expect::NetworkChoice, Input::Text(_)) => Action::Reject("Please pick a network below."),
        (Expect::Confirmation, Input::Text(_)) => {
            Action::Reject("Please confirm or cancel with the buttons below.")
        }

        (_, Input::Select(_)) => Action::Ignore { show_menu: false },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::state::Step;

    fn at(step: Step) -> ConversationState {
        let mut state = ConversationState::enter(1, step.flow());
        state.step = step;
        state
    }

    fn usdt() -> Selection {
        Selection::Currency(Currency::new("USDT").unwrap())
    }

    #[test]
    fn test_flow_entry_always_wins() {
        for state in [None, Some(at(Step::TransferConfirm))] {
            assert_eq!(
                route(state.as_ref(), &Input::Select(Selection::Flow(Flow::Deposit))),
                Action::Enter(Flow::Deposit)
            );
        }
    }

    #[test]
    fn test_cancel_and_menu_reset() {
        let state = at(Step::WithdrawAddress);
        assert_eq!(
            route(Some(&state), &Input::Select(Selection::Cancel)),
            Action::Reset
        );
        assert_eq!(route(None, &Input::Select(Selection::MainMenu)), Action::Reset);
    }

    #[test]
    fn test_no_flow_ignores_with_menu() {
        assert_eq!(
            route(None, &Input::Text("5".into())),
            Action::Ignore { show_menu: true }
        );
        assert_eq!(
            route(None, &Input::Select(Selection::Confirm)),
            Action::Ignore { show_menu: true }
        );
    }

    #[test]
    fn test_matching_input_is_captured() {
        assert_eq!(
            route(Some(&at(Step::DepositCurrency)), &Input::Select(usdt())),
            Action::Capture(Capture::Currency(Currency::new("USDT").unwrap()))
        );
        assert_eq!(
            route(
                Some(&at(Step::WithdrawNetwork)),
                &Input::Select(Selection::Network("TON".into()))
            ),
            Action::Capture(Capture::Network("TON".into()))
        );
        assert_eq!(
            route(Some(&at(Step::TransferRecipient)), &Input::Text("42".into())),
            Action::Capture(Capture::Text("42".into()))
        );
        assert_eq!(
            route(
                Some(&at(Step::WithdrawConfirm)),
                &Input::Select(Selection::Confirm)
            ),
            Action::Execute
        );
    }

    #[test]
    fn test_text_at_selection_step_is_rejected() {
        for step in [Step::TransferCurrency, Step::WithdrawNetwork, Step::TransferConfirm] {
            assert!(matches!(
                route(Some(&at(step)), &Input::Text("hello".into())),
                Action::Reject(_)
            ));
        }
    }

    #[test]
    fn test_selection_at_text_step_is_ignored() {
        assert_eq!(
            route(Some(&at(Step::TransferAmount)), &Input::Select(usdt())),
            Action::Ignore { show_menu: false }
        );
        assert_eq!(
            route(
                Some(&at(Step::DepositAmount)),
                &Input::Select(Selection::Confirm)
            ),
            Action::Ignore { show_menu: false }
        );
    }

    #[test]
    fn test_stale_button_of_other_step_is_ignored() {
        assert_eq!(
            route(
                Some(&at(Step::WithdrawCurrency)),
                &Input::Select(Selection::Network("TON".into()))
            ),
            Action::Ignore { show_menu: false }
        );
    }
}
