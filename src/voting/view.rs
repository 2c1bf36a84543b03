use super::tally::total_votes;
use super::{Tally, UserVote};
use crate::models::PollStart;
use std::collections::HashMap;

// One answer as it should be shown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionView {
    pub answer_id: String,
    pub text: String,
    /// `None` while results are hidden.
    pub votes: Option<u32>,
    pub checked: bool,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollView {
    Live {
        question: String,
        edited: bool,
        options: Vec<OptionView>,
        my_vote: Option<String>,
        total_text: String,
    },
    Ended {
        question: String,
        edited: bool,
        options: Vec<OptionView>,
        total_text: String,
    },
}

impl PollView {
    pub fn options(&self) -> &[OptionView] {
        match self {
            PollView::Live { options, .. } | PollView::Ended { options, .. } => options,
        }
    }

    pub fn total_text(&self) -> &str {
        match self {
            PollView::Live { total_text, .. } | PollView::Ended { total_text, .. } => total_text,
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, PollView::Ended { .. })
    }
}

fn votes_phrase(count: u32) -> String {
    if count == 1 {
        "1 vote".to_string()
    } else {
        format!("{} votes", count)
    }
}

fn total_text(ended: bool, disclosed: bool, has_voted: bool, total: u32) -> String {
    if ended {
        format!("Final result based on {}", votes_phrase(total))
    } else if !disclosed {
        "Results will be visible when the poll is ended".to_string()
    } else if !has_voted {
        if total == 0 {
            "No votes cast".to_string()
        } else {
            format!("{} cast. Vote to see the results", votes_phrase(total))
        }
    } else {
        format!("Based on {}", votes_phrase(total))
    }
}

/// Presentation of a poll for `user_id`.
///
/// Disclosed polls reveal counts once the user has voted; undisclosed polls
/// only once ended. Ended polls check every answer sharing the winning count.
pub fn render_poll(
    poll: &PollStart,
    ended: bool,
    user_votes: &HashMap<String, UserVote>,
    votes: &Tally,
    user_id: &str,
    edited: bool,
) -> PollView {
    let total = total_votes(votes);
    let win_count = votes.values().copied().max();
    let my_vote = user_votes
        .get(user_id)
        .and_then(|v| v.answers.first())
        .cloned();
    // Counts stay hidden until the user has voted on a disclosed poll
    let show_results = ended || (poll.is_disclosed() && my_vote.is_some());

    let options = poll
        .answers
        .iter()
        .map(|answer| {
            let count = if show_results {
                votes.get(&answer.id).copied().unwrap_or(0)
            } else {
                0
            };
            // Ended polls mark the winners, live ones the user's pick
            let checked = if ended {
                win_count == Some(count)
            } else {
                my_vote.as_deref() == Some(answer.id.as_str())
            };
            let percent = if total == 0 {
                0
            } else {
                (100.0 * count as f64 / total as f64).round() as u32
            };
            OptionView {
                answer_id: answer.id.clone(),
                text: answer.text.clone(),
                votes: show_results.then_some(count),
                checked,
                percent,
            }
        })
        .collect();

    let total_text = total_text(ended, poll.is_disclosed(), my_vote.is_some(), total);
    let question = poll.question.clone();

    if ended {
        PollView::Ended {
            question,
            edited,
            options,
            total_text,
        }
    } else {
        PollView::Live {
            question,
            edited,
            options,
            my_vote,
            total_text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PollKind;
    use crate::models::test_utils::*;
    use crate::voting::{collect_user_votes, count_votes};

    const ME: &str = "@me:example.org";

    fn poll(kind: PollKind) -> PollStart {
        PollStart::from_event(&poll_start_event("$poll", kind, &[("a", "A"), ("b", "B"), ("c", "C")])).unwrap()
    }

    fn render(kind: PollKind, ended: bool, votes: Vec<UserVote>, selected: Option<&str>) -> PollView {
        let poll = poll(kind);
        let user_votes = collect_user_votes(votes, Some(ME), selected);
        let tally = count_votes(&user_votes, &poll);
        render_poll(&poll, ended, &user_votes, &tally, ME, false)
    }

    fn others() -> Vec<UserVote> {
        vec![
            UserVote::new(1, "@x:example.org", vec!["a".into()]),
            UserVote::new(2, "@y:example.org", vec!["a".into()]),
            UserVote::new(3, "@z:example.org", vec!["b".into()]),
        ]
    }

    #[test]
    fn disclosed_results_hidden_until_voting() {
        let view = render(PollKind::Disclosed, false, others(), None);
        assert_eq!(view.total_text(), "3 votes cast. Vote to see the results");
        assert!(view.options().iter().all(|o| o.votes.is_none() && !o.checked));

        let empty = render(PollKind::Disclosed, false, vec![], None);
        assert_eq!(empty.total_text(), "No votes cast");
    }

    #[test]
    fn disclosed_results_shown_after_voting() {
        let view = render(PollKind::Disclosed, false, others(), Some("b"));
        assert_eq!(view.total_text(), "Based on 4 votes");
        let b = &view.options()[1];
        assert_eq!(b.votes, Some(2));
        assert!(b.checked);
        assert_eq!(b.percent, 50);
        assert!(matches!(view, PollView::Live { my_vote: Some(ref v), .. } if v == "b"));
    }

    #[test]
    fn undisclosed_results_hidden_until_ended() {
        let view = render(PollKind::Undisclosed, false, others(), Some("b"));
        assert_eq!(view.total_text(), "Results will be visible when the poll is ended");
        assert!(view.options().iter().all(|o| o.votes.is_none()));
        assert!(view.options()[1].checked);
    }

    #[test]
    fn ended_polls_check_winners() {
        let view = render(PollKind::Undisclosed, true, others(), None);
        assert!(view.is_ended());
        assert_eq!(view.total_text(), "Final result based on 3 votes");
        let checked: Vec<_> = view.options().iter().map(|o| o.checked).collect();
        assert_eq!(checked, vec![true, false, false]);
        assert_eq!(view.options()[0].percent, 67);
    }

    #[test]
    fn ended_polls_without_votes_have_no_winner() {
        let view = render(PollKind::Disclosed, true, vec![], None);
        assert_eq!(view.total_text(), "Final result based on 0 votes");
        assert!(view.options().iter().all(|o| !o.checked && o.votes == Some(0)));
    }

    #[test]
    fn single_vote_is_singular() {
        let view = render(PollKind::Disclosed, true, vec![UserVote::new(1, "@x:example.org", vec!["c".into()])], None);
        assert_eq!(view.total_text(), "Final result based on 1 vote");
    }
}
