// Intake state machine: keypad and button events -> ordered member records

use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Member data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeBracket {
    #[serde(rename = "pre-sc")]
    PreSchool,
    #[serde(rename = "els")]
    Elementary,
    #[serde(rename = "jhs")]
    JuniorHigh,
    #[serde(rename = "hs")]
    HighSchool,
    #[serde(rename = "cs")]
    University,
    #[serde(rename = "20s")]
    Twenties,
    #[serde(rename = "30s")]
    Thirties,
    #[serde(rename = "40s")]
    Forties,
    #[serde(rename = "50s")]
    Fifties,
    #[serde(rename = "60s")]
    Sixties,
    #[serde(rename = "70s")]
    Seventies,
    #[serde(rename = "80s+")]
    EightiesPlus,
    #[serde(rename = "no-answer")]
    NoAnswer,
}

impl AgeBracket {
    /// All brackets in keypad order; index + 1 is the ordinal.
    pub const ALL: [AgeBracket; 13] = [
        AgeBracket::PreSchool,
        AgeBracket::Elementary,
        AgeBracket::JuniorHigh,
        AgeBracket::HighSchool,
        AgeBracket::University,
        AgeBracket::Twenties,
        AgeBracket::Thirties,
        AgeBracket::Forties,
        AgeBracket::Fifties,
        AgeBracket::Sixties,
        AgeBracket::Seventies,
        AgeBracket::EightiesPlus,
        AgeBracket::NoAnswer,
    ];

    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        let index = usize::try_from(ordinal).ok()?.checked_sub(1)?;
        Self::ALL.get(index).copied()
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.code() == code)
    }

    pub fn ordinal(self) -> u32 {
        // ALL is ordered by declaration, so the discriminant is the index
        self as u32 + 1
    }

    /// Code sent to the registration service
    pub fn code(self) -> &'static str {
        match self {
            AgeBracket::PreSchool => "pre-sc",
            AgeBracket::Elementary => "els",
            AgeBracket::JuniorHigh => "jhs",
            AgeBracket::HighSchool => "hs",
            AgeBracket::University => "cs",
            AgeBracket::Twenties => "20s",
            AgeBracket::Thirties => "30s",
            AgeBracket::Forties => "40s",
            AgeBracket::Fifties => "50s",
            AgeBracket::Sixties => "60s",
            AgeBracket::Seventies => "70s",
            AgeBracket::EightiesPlus => "80s+",
            AgeBracket::NoAnswer => "no-answer",
        }
    }

    /// Label shown on screen and printed on the group ticket
    pub fn label(self) -> &'static str {
        match self {
            AgeBracket::PreSchool => "未就学児",
            AgeBracket::Elementary => "小学生",
            AgeBracket::JuniorHigh => "中学生",
            AgeBracket::HighSchool => "高校生",
            AgeBracket::University => "大学生",
            AgeBracket::Twenties => "20代",
            AgeBracket::Thirties => "30代",
            AgeBracket::Forties => "40代",
            AgeBracket::Fifties => "50代",
            AgeBracket::Sixties => "60代",
            AgeBracket::Seventies => "70代",
            AgeBracket::EightiesPlus => "80代以上",
            AgeBracket::NoAnswer => "回答しない",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "male")]
    Male,
    #[serde(rename = "female")]
    Female,
    #[serde(rename = "no-answer")]
    NoAnswer,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::NoAnswer];

    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        let index = usize::try_from(ordinal).ok()?.checked_sub(1)?;
        Self::ALL.get(index).copied()
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.code() == code)
    }

    pub fn ordinal(self) -> u32 {
        self as u32 + 1
    }

    pub fn code(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::NoAnswer => "no-answer",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Gender::Male => "男性",
            Gender::Female => "女性",
            Gender::NoAnswer => "回答しない",
        }
    }
}

/// One confirmed group member. The first record is the representative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(rename = "ageRange")]
    pub age_range: AgeBracket,
    pub gender: Gender,
}

// ============================================================================
// Events and transitions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeEvent {
    Digit(u8),
    Backspace,
    Confirm,
    /// On-screen age button
    SelectAge(AgeBracket),
    /// On-screen gender button (still needs a Confirm)
    SelectGender(Gender),
}

impl IntakeEvent {
    /// Parse a keyboard key name as delivered by the kiosk page or keypad bridge
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "Enter" => Some(IntakeEvent::Confirm),
            "Backspace" => Some(IntakeEvent::Backspace),
            _ => {
                let mut chars = key.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c.to_digit(10).map(|d| IntakeEvent::Digit(d as u8)),
                    _ => None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "member_index", rename_all = "snake_case")]
pub enum IntakePhase {
    AwaitingCount,
    AwaitingAge(usize),
    AwaitingGender(usize),
    Submitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A submission is in flight
    Busy,
    /// The event has no meaning in the current phase
    NotApplicable,
    EmptyBuffer,
    /// The digit buffer already holds [`MAX_BUFFER_DIGITS`] digits
    BufferFull,
    InvalidCount,
    InvalidAgeOrdinal,
    InvalidGenderOrdinal,
    GenderNotSelected,
    /// The intake is complete and waits for the submission result
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Transition {
    Accepted,
    /// The last member was confirmed; the session is now `Submitting`
    Completed,
    Rejected(RejectReason),
}

// ============================================================================
// Session
// ============================================================================

/// Longest digit buffer kept; no headcount or age ordinal needs more
pub const MAX_BUFFER_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntakeSession {
    pub count_digits: String,
    pub expected_count: usize,
    pub members: Vec<MemberRecord>,
    pub current_index: usize,
    pub pending_age_digits: String,
    pub pending_age: Option<AgeBracket>,
    pub pending_gender: Option<Gender>,
    pub phase: IntakePhase,
}

impl IntakeSession {
    pub fn new() -> Self {
        Self {
            count_digits: String::new(),
            expected_count: 0,
            members: Vec::new(),
            current_index: 0,
            pending_age_digits: String::new(),
            pending_age: None,
            pending_gender: None,
            phase: IntakePhase::AwaitingCount,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == IntakePhase::Submitting
    }

    /// Apply one input event. Rejected events leave the session untouched.
    pub fn submit_event(&mut self, event: IntakeEvent) -> Transition {
        let transition = match self.phase {
            IntakePhase::AwaitingCount => self.on_count(event),
            IntakePhase::AwaitingAge(i) => self.on_age(i, event),
            IntakePhase::AwaitingGender(i) => self.on_gender(i, event),
            IntakePhase::Submitting => Transition::Rejected(RejectReason::Terminal),
        };
        debug!(?event, ?transition, phase = ?self.phase, "intake event");
        transition
    }

    fn on_count(&mut self, event: IntakeEvent) -> Transition {
        match event {
            IntakeEvent::Digit(d) => push_digit(&mut self.count_digits, d),
            IntakeEvent::Backspace => {
                if self.count_digits.pop().is_some() {
                    Transition::Accepted
                } else {
                    Transition::Rejected(RejectReason::EmptyBuffer)
                }
            }
            IntakeEvent::Confirm => match parse_buffer(&self.count_digits) {
                Some(n) if n > 0 => {
                    self.expected_count = n as usize;
                    self.members.clear();
                    self.current_index = 0;
                    self.pending_age_digits.clear();
                    self.pending_age = None;
                    self.pending_gender = None;
                    self.phase = IntakePhase::AwaitingAge(0);
                    Transition::Accepted
                }
                _ if self.count_digits.is_empty() => {
                    Transition::Rejected(RejectReason::EmptyBuffer)
                }
                _ => Transition::Rejected(RejectReason::InvalidCount),
            },
            IntakeEvent::SelectAge(_) | IntakeEvent::SelectGender(_) => {
                Transition::Rejected(RejectReason::NotApplicable)
            }
        }
    }

    fn on_age(&mut self, index: usize, event: IntakeEvent) -> Transition {
        match event {
            IntakeEvent::Digit(d) => push_digit(&mut self.pending_age_digits, d),
            IntakeEvent::Backspace => {
                if self.pending_age_digits.pop().is_some() {
                    Transition::Accepted
                } else {
                    Transition::Rejected(RejectReason::EmptyBuffer)
                }
            }
            IntakeEvent::Confirm => {
                if self.pending_age_digits.is_empty() {
                    return Transition::Rejected(RejectReason::EmptyBuffer);
                }
                match parse_buffer(&self.pending_age_digits).and_then(AgeBracket::from_ordinal) {
                    Some(bracket) => self.accept_age(index, bracket),
                    None => Transition::Rejected(RejectReason::InvalidAgeOrdinal),
                }
            }
            // Same end state as typing the ordinal into an empty buffer and confirming
            IntakeEvent::SelectAge(bracket) => self.accept_age(index, bracket),
            IntakeEvent::SelectGender(_) => Transition::Rejected(RejectReason::NotApplicable),
        }
    }

    fn accept_age(&mut self, index: usize, bracket: AgeBracket) -> Transition {
        self.pending_age = Some(bracket);
        self.pending_age_digits.clear();
        self.pending_gender = None;
        self.phase = IntakePhase::AwaitingGender(index);
        Transition::Accepted
    }

    fn on_gender(&mut self, index: usize, event: IntakeEvent) -> Transition {
        match event {
            IntakeEvent::Digit(d) => match Gender::from_ordinal(u32::from(d)) {
                Some(gender) => {
                    self.pending_gender = Some(gender);
                    Transition::Accepted
                }
                None => Transition::Rejected(RejectReason::InvalidGenderOrdinal),
            },
            IntakeEvent::SelectGender(gender) => {
                self.pending_gender = Some(gender);
                Transition::Accepted
            }
            IntakeEvent::Confirm => {
                let (Some(age_range), Some(gender)) = (self.pending_age, self.pending_gender)
                else {
                    return Transition::Rejected(RejectReason::GenderNotSelected);
                };
                self.members.push(MemberRecord { age_range, gender });
                self.pending_age = None;
                self.pending_gender = None;

                if index + 1 < self.expected_count {
                    self.current_index = index + 1;
                    self.phase = IntakePhase::AwaitingAge(index + 1);
                    Transition::Accepted
                } else {
                    self.phase = IntakePhase::Submitting;
                    Transition::Completed
                }
            }
            IntakeEvent::Backspace | IntakeEvent::SelectAge(_) => {
                Transition::Rejected(RejectReason::NotApplicable)
            }
        }
    }
}

impl Default for IntakeSession {
    fn default() -> Self {
        Self::new()
    }
}

fn push_digit(buffer: &mut String, d: u8) -> Transition {
    if buffer.len() >= MAX_BUFFER_DIGITS {
        return Transition::Rejected(RejectReason::BufferFull);
    }
    buffer.push(digit_char(d));
    Transition::Accepted
}

fn digit_char(d: u8) -> char {
    char::from_digit(u32::from(d.min(9)), 10).unwrap_or('0')
}

/// Parse a digit buffer; overflow never resolves.
fn parse_buffer(digits: &str) -> Option<u32> {
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(session: &mut IntakeSession, keys: &[&str]) -> Vec<Transition> {
        keys.iter()
            .map(|k| session.submit_event(IntakeEvent::from_key(k).expect("valid key")))
            .collect()
    }

    fn session_at_age() -> IntakeSession {
        let mut session = IntakeSession::new();
        keys(&mut session, &["3", "Enter"]);
        session
    }

    #[test]
    fn test_headcount_confirm_moves_to_first_member() {
        let mut session = IntakeSession::new();
        keys(&mut session, &["3", "Enter"]);

        assert_eq!(session.phase, IntakePhase::AwaitingAge(0));
        assert_eq!(session.expected_count, 3);
        assert_eq!(session.current_index, 0);
        assert!(session.members.is_empty());
    }

    #[test]
    fn test_empty_or_zero_headcount_is_rejected() {
        let mut session = IntakeSession::new();
        let before = session.clone();
        assert_eq!(
            session.submit_event(IntakeEvent::Confirm),
            Transition::Rejected(RejectReason::EmptyBuffer)
        );
        assert_eq!(session, before);

        keys(&mut session, &["0"]);
        let before = session.clone();
        assert_eq!(
            session.submit_event(IntakeEvent::Confirm),
            Transition::Rejected(RejectReason::InvalidCount)
        );
        assert_eq!(session, before);
    }

    #[test]
    fn test_headcount_backspace() {
        let mut session = IntakeSession::new();
        keys(&mut session, &["1", "2", "Backspace"]);
        assert_eq!(session.count_digits, "1");

        keys(&mut session, &["Backspace"]);
        assert_eq!(
            session.submit_event(IntakeEvent::Backspace),
            Transition::Rejected(RejectReason::EmptyBuffer)
        );
    }

    #[test]
    fn test_age_ordinal_selects_bracket() {
        let mut session = session_at_age();
        keys(&mut session, &["5", "Enter"]);

        assert_eq!(session.phase, IntakePhase::AwaitingGender(0));
        assert_eq!(session.pending_age, Some(AgeBracket::University));
        assert!(session.pending_age_digits.is_empty());
    }

    #[test]
    fn test_out_of_range_age_ordinal_is_noop() {
        for typed in [&["0"][..], &["1", "4"][..]] {
            let mut session = session_at_age();
            keys(&mut session, typed);
            let before = session.clone();

            assert_eq!(
                session.submit_event(IntakeEvent::Confirm),
                Transition::Rejected(RejectReason::InvalidAgeOrdinal)
            );
            assert_eq!(session, before);
        }
    }

    #[test]
    fn test_leading_zero_age_ordinal() {
        let mut session = session_at_age();
        keys(&mut session, &["0", "5", "Enter"]);
        assert_eq!(session.pending_age, Some(AgeBracket::University));
    }

    #[test]
    fn test_gender_confirm_appends_member_and_completes() {
        let mut session = IntakeSession::new();
        keys(&mut session, &["1", "Enter", "5", "Enter", "2"]);
        let last = session.submit_event(IntakeEvent::Confirm);

        assert_eq!(last, Transition::Completed);
        assert_eq!(session.phase, IntakePhase::Submitting);
        assert!(session.is_complete());
        assert_eq!(
            session.members,
            vec![MemberRecord {
                age_range: AgeBracket::University,
                gender: Gender::Female
            }]
        );
    }

    #[test]
    fn test_gender_confirm_without_selection_is_noop() {
        let mut session = session_at_age();
        keys(&mut session, &["6", "Enter"]);
        let before = session.clone();

        assert_eq!(
            session.submit_event(IntakeEvent::Confirm),
            Transition::Rejected(RejectReason::GenderNotSelected)
        );
        assert_eq!(session, before);

        assert_eq!(
            session.submit_event(IntakeEvent::Digit(7)),
            Transition::Rejected(RejectReason::InvalidGenderOrdinal)
        );
        assert_eq!(session, before);
    }

    #[test]
    fn test_digit_buffers_are_capped() {
        let mut session = IntakeSession::new();
        for _ in 0..MAX_BUFFER_DIGITS {
            assert_eq!(session.submit_event(IntakeEvent::Digit(0)), Transition::Accepted);
        }
        let before = session.clone();
        assert_eq!(
            session.submit_event(IntakeEvent::Digit(2)),
            Transition::Rejected(RejectReason::BufferFull)
        );
        assert_eq!(session, before);

        // Leading zeros still resolve once the buffer is trimmed
        keys(&mut session, &["Backspace", "2", "Enter"]);
        assert_eq!(session.expected_count, 2);

        for _ in 0..MAX_BUFFER_DIGITS + 5 {
            session.submit_event(IntakeEvent::Digit(9));
        }
        assert_eq!(session.pending_age_digits.len(), MAX_BUFFER_DIGITS);
        assert_eq!(session.phase, IntakePhase::AwaitingAge(0));
    }

    #[test]
    fn test_headcount_n_produces_n_members() {
        for n in 1..=6usize {
            let mut session = IntakeSession::new();
            for c in n.to_string().chars() {
                session.submit_event(IntakeEvent::Digit(c.to_digit(10).unwrap() as u8));
            }
            session.submit_event(IntakeEvent::Confirm);

            for i in 0..n {
                assert_eq!(session.phase, IntakePhase::AwaitingAge(i));
                assert_eq!(session.members.len(), session.current_index);
                let age = (i % 13 + 1) as u8;
                if age >= 10 {
                    session.submit_event(IntakeEvent::Digit(1));
                    session.submit_event(IntakeEvent::Digit(age - 10));
                } else {
                    session.submit_event(IntakeEvent::Digit(age));
                }
                session.submit_event(IntakeEvent::Confirm);
                session.submit_event(IntakeEvent::Digit((i % 3 + 1) as u8));
                session.submit_event(IntakeEvent::Confirm);
                assert!(session.members.len() <= session.expected_count);
            }

            assert!(session.is_complete());
            assert_eq!(session.members.len(), n);
        }
    }

    #[test]
    fn test_submitting_rejects_everything() {
        let mut session = IntakeSession::new();
        keys(&mut session, &["1", "Enter", "1", "Enter", "1", "Enter"]);
        assert!(session.is_complete());
        let before = session.clone();

        for event in [
            IntakeEvent::Digit(1),
            IntakeEvent::Backspace,
            IntakeEvent::Confirm,
            IntakeEvent::SelectAge(AgeBracket::Thirties),
            IntakeEvent::SelectGender(Gender::Male),
        ] {
            assert_eq!(
                session.submit_event(event),
                Transition::Rejected(RejectReason::Terminal)
            );
        }
        assert_eq!(session, before);
    }

    #[test]
    fn test_age_button_matches_keystrokes() {
        for bracket in AgeBracket::ALL {
            let mut typed = session_at_age();
            for c in bracket.ordinal().to_string().chars() {
                typed.submit_event(IntakeEvent::Digit(c.to_digit(10).unwrap() as u8));
            }
            typed.submit_event(IntakeEvent::Confirm);

            let mut pressed = session_at_age();
            pressed.submit_event(IntakeEvent::SelectAge(bracket));

            assert_eq!(typed, pressed);
        }
    }

    #[test]
    fn test_gender_button_matches_keystroke() {
        for gender in Gender::ALL {
            let mut typed = session_at_age();
            keys(&mut typed, &["2", "Enter"]);
            let mut pressed = typed.clone();

            typed.submit_event(IntakeEvent::Digit(gender.ordinal() as u8));
            pressed.submit_event(IntakeEvent::SelectGender(gender));
            assert_eq!(typed, pressed);
        }
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(IntakeEvent::from_key("7"), Some(IntakeEvent::Digit(7)));
        assert_eq!(IntakeEvent::from_key("Enter"), Some(IntakeEvent::Confirm));
        assert_eq!(IntakeEvent::from_key("Backspace"), Some(IntakeEvent::Backspace));
        assert_eq!(IntakeEvent::from_key("12"), None);
        assert_eq!(IntakeEvent::from_key("a"), None);
        assert_eq!(IntakeEvent::from_key(""), None);
    }

    #[test]
    fn test_ordinals_and_codes() {
        assert_eq!(AgeBracket::from_ordinal(1), Some(AgeBracket::PreSchool));
        assert_eq!(AgeBracket::from_ordinal(13), Some(AgeBracket::NoAnswer));
        assert_eq!(AgeBracket::from_ordinal(0), None);
        assert_eq!(AgeBracket::from_ordinal(14), None);
        assert_eq!(AgeBracket::EightiesPlus.ordinal(), 12);
        assert_eq!(AgeBracket::from_code("80s+"), Some(AgeBracket::EightiesPlus));
        assert_eq!(Gender::from_ordinal(2), Some(Gender::Female));
        assert_eq!(Gender::from_code("no-answer"), Some(Gender::NoAnswer));

        let json = serde_json::to_value(MemberRecord {
            age_range: AgeBracket::University,
            gender: Gender::NoAnswer,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"ageRange": "cs", "gender": "no-answer"}));
    }
}
