use std::path::Path;
use std::time::UNIX_EPOCH;

use thiserror::Error;

use crate::schemas::answer::{AnswerValue, UploadMetadata};
use crate::schemas::question::{Question, QuestionType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption<'a> {
    pub label: &'a str,
    pub selected: bool,
}

/// The one input shape a question renders as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerInput<'a> {
    SingleChoice { options: Vec<ChoiceOption<'a>> },
    MultiChoice { options: Vec<ChoiceOption<'a>> },
    Text { value: &'a str },
    ImageUpload { file: Option<&'a UploadMetadata> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView<'a> {
    pub number: usize,
    pub type_label: &'static str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub points: i32,
    pub input: AnswerInput<'a>,
    pub answered: bool,
    pub disabled: bool,
}

impl QuestionView<'_> {
    pub fn points_label(&self) -> String {
        let unit = if self.points == 1 { "point" } else { "points" };
        format!("{} {unit}", self.points)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("answers are locked")]
    Disabled,
    #[error("{0} questions do not take this kind of answer")]
    WrongType(&'static str),
    #[error("'{0}' is not one of the options")]
    UnknownOption(String),
    #[error("cannot read upload: {0}")]
    Upload(String),
}

/// Maps a question and its current answer to what should be shown. An absent
/// answer, or one whose shape does not fit the question, renders as unanswered.
pub fn render<'a>(
    question: &'a Question,
    answer: Option<&'a AnswerValue>,
    number: usize,
    disabled: bool,
) -> QuestionView<'a> {
    let input = match question.question_type {
        QuestionType::SingleChoice => {
            let selected = answer.and_then(AnswerValue::as_text);
            AnswerInput::SingleChoice {
                options: question
                    .options()
                    .iter()
                    .map(|label| ChoiceOption {
                        label: label.as_str(),
                        selected: selected == Some(label.as_str()),
                    })
                    .collect(),
            }
        }
        QuestionType::MultiChoice => {
            let selected = answer.and_then(AnswerValue::as_selections).unwrap_or_default();
            AnswerInput::MultiChoice {
                options: question
                    .options()
                    .iter()
                    .map(|label| ChoiceOption {
                        label: label.as_str(),
                        selected: selected.contains(label),
                    })
                    .collect(),
            }
        }
        QuestionType::Text => {
            AnswerInput::Text { value: answer.and_then(AnswerValue::as_text).unwrap_or_default() }
        }
        QuestionType::ImageUpload => {
            AnswerInput::ImageUpload { file: answer.and_then(AnswerValue::as_upload) }
        }
    };

    let answered = match &input {
        AnswerInput::SingleChoice { options } | AnswerInput::MultiChoice { options } => {
            options.iter().any(|option| option.selected)
        }
        AnswerInput::Text { value } => !value.trim().is_empty(),
        AnswerInput::ImageUpload { file } => file.is_some(),
    };

    QuestionView {
        number,
        type_label: question.question_type.label(),
        title: &question.title,
        description: question.description.as_deref().filter(|text| !text.trim().is_empty()),
        points: question.max_score,
        input,
        answered,
        disabled,
    }
}

pub fn select_option(
    question: &Question,
    option: &str,
    disabled: bool,
) -> Result<AnswerValue, EditError> {
    guard(question, disabled, QuestionType::SingleChoice)?;
    let label = find_option(question, option)?;
    Ok(AnswerValue::Text(label.to_string()))
}

/// Returns the full new selection with `option` flipped.
pub fn toggle_option(
    question: &Question,
    current: Option<&AnswerValue>,
    option: &str,
    disabled: bool,
) -> Result<AnswerValue, EditError> {
    guard(question, disabled, QuestionType::MultiChoice)?;
    let label = find_option(question, option)?;

    let mut selections =
        current.and_then(AnswerValue::as_selections).map(<[String]>::to_vec).unwrap_or_default();
    if let Some(position) = selections.iter().position(|item| item == label) {
        selections.remove(position);
    } else {
        selections.push(label.to_string());
    }
    Ok(AnswerValue::Selections(selections))
}

pub fn set_selections(
    question: &Question,
    options: &[&str],
    disabled: bool,
) -> Result<AnswerValue, EditError> {
    guard(question, disabled, QuestionType::MultiChoice)?;
    let mut selections: Vec<String> = Vec::with_capacity(options.len());
    for option in options {
        let label = find_option(question, option)?;
        if !selections.iter().any(|item| item == label) {
            selections.push(label.to_string());
        }
    }
    Ok(AnswerValue::Selections(selections))
}

pub fn set_text(question: &Question, text: &str, disabled: bool) -> Result<AnswerValue, EditError> {
    guard(question, disabled, QuestionType::Text)?;
    Ok(AnswerValue::Text(text.to_string()))
}

/// Records the file's metadata. The bytes themselves are never sent.
pub fn attach_upload(
    question: &Question,
    file: UploadMetadata,
    disabled: bool,
) -> Result<AnswerValue, EditError> {
    guard(question, disabled, QuestionType::ImageUpload)?;
    if !file.file_type.starts_with("image/") {
        return Err(EditError::Upload(format!("{} is not an image", file.file_name)));
    }
    Ok(AnswerValue::Upload(file))
}

/// Interprets one line of user input as an answer for `question`.
///
/// Choice questions accept an option label or its 1-based position; multi
/// choice takes a comma-separated list.
pub fn parse_answer(
    question: &Question,
    raw: &str,
    disabled: bool,
) -> Result<AnswerValue, EditError> {
    match question.question_type {
        QuestionType::SingleChoice => {
            let label = resolve_option(question, raw.trim());
            select_option(question, label, disabled)
        }
        QuestionType::MultiChoice => {
            let picks = raw
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| resolve_option(question, item))
                .collect::<Vec<_>>();
            set_selections(question, &picks, disabled)
        }
        QuestionType::Text => set_text(question, raw, disabled),
        QuestionType::ImageUpload => Err(EditError::WrongType(question.question_type.as_str())),
    }
}

/// Option label for `raw`, accepting either the label or its 1-based position.
pub fn resolve_option<'a>(question: &'a Question, raw: &'a str) -> &'a str {
    if question.options().iter().any(|option| option == raw) {
        return raw;
    }
    raw.parse::<usize>()
        .ok()
        .and_then(|index| index.checked_sub(1))
        .and_then(|index| question.options().get(index))
        .map(String::as_str)
        .unwrap_or(raw)
}

/// Reads what an upload answer records about a local file.
pub fn upload_metadata_from_path(path: &Path) -> Result<UploadMetadata, EditError> {
    let metadata = std::fs::metadata(path)
        .map_err(|err| EditError::Upload(format!("{}: {err}", path.display())))?;
    if !metadata.is_file() {
        return Err(EditError::Upload(format!("{} is not a file", path.display())));
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| EditError::Upload(format!("{} has no file name", path.display())))?
        .to_string();
    let last_modified = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default();

    Ok(UploadMetadata {
        file_type: mime_guess::from_path(path).first_or_octet_stream().to_string(),
        file_name,
        file_size: metadata.len(),
        last_modified,
    })
}

/// Plain-text rendering used by the terminal front end.
pub fn render_text(view: &QuestionView<'_>) -> String {
    let mut out = format!(
        "Question {} [{}] ({})\n{}\n",
        view.number,
        view.type_label,
        view.points_label(),
        view.title
    );
    if let Some(description) = view.description {
        out.push_str(description);
        out.push('\n');
    }

    match &view.input {
        AnswerInput::SingleChoice { options } | AnswerInput::MultiChoice { options } => {
            let multi = matches!(view.input, AnswerInput::MultiChoice { .. });
            for (index, option) in options.iter().enumerate() {
                let mark = match (multi, option.selected) {
                    (true, true) => "[x]",
                    (true, false) => "[ ]",
                    (false, true) => "(*)",
                    (false, false) => "( )",
                };
                out.push_str(&format!("  {mark} {}. {}\n", index + 1, option.label));
            }
        }
        AnswerInput::Text { value } if value.is_empty() => out.push_str("  (no answer yet)\n"),
        AnswerInput::Text { value } => out.push_str(&format!("  > {value}\n")),
        AnswerInput::ImageUpload { file: Some(file) } => out.push_str(&format!(
            "  uploaded: {} ({} bytes, {})\n",
            file.file_name, file.file_size, file.file_type
        )),
        AnswerInput::ImageUpload { file: None } => out.push_str("  (no image attached)\n"),
    }

    if view.disabled {
        out.push_str("  answers are locked\n");
    }
    out
}

fn guard(question: &Question, disabled: bool, expected: QuestionType) -> Result<(), EditError> {
    if disabled {
        return Err(EditError::Disabled);
    }
    if question.question_type != expected {
        return Err(EditError::WrongType(question.question_type.as_str()));
    }
    Ok(())
}

fn find_option<'a>(question: &'a Question, option: &str) -> Result<&'a str, EditError> {
    question
        .options()
        .iter()
        .find(|candidate| candidate.as_str() == option)
        .map(String::as_str)
        .ok_or_else(|| EditError::UnknownOption(option.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;

    #[test]
    fn resumed_single_choice_answer_is_preselected() {
        let question = fixtures::single_choice("q1", &["A", "B", "C"]);
        let answer = AnswerValue::Text("B".to_string());
        let view = render(&question, Some(&answer), 1, false);

        let AnswerInput::SingleChoice { options } = &view.input else {
            panic!("expected single choice input, got {:?}", view.input);
        };
        let selected: Vec<&str> =
            options.iter().filter(|option| option.selected).map(|option| option.label).collect();
        assert_eq!(selected, vec!["B"]);
        assert!(view.answered);
    }

    #[test]
    fn absent_or_mismatched_answer_is_unanswered() {
        let question = fixtures::multi_choice("q1", &["A", "B"]);
        assert!(!render(&question, None, 1, false).answered);

        let wrong_shape = AnswerValue::Text("A".to_string());
        let view = render(&question, Some(&wrong_shape), 1, false);
        assert!(!view.answered);

        let text = fixtures::text("q2");
        let upload = AnswerValue::Upload(fixtures::upload("scan.png"));
        let view = render(&text, Some(&upload), 2, false);
        assert_eq!(view.input, AnswerInput::Text { value: "" });
    }

    #[test]
    fn each_type_renders_its_own_input() {
        let cases = [
            (fixtures::single_choice("a", &["x", "y"]), "single choice"),
            (fixtures::multi_choice("b", &["x", "y"]), "multi choice"),
            (fixtures::text("c"), "text"),
            (fixtures::image_upload("d"), "image upload"),
        ];
        for (question, label) in &cases {
            let view = render(question, None, 3, false);
            assert_eq!(view.type_label, *label);
            let matches_type = match question.question_type {
                QuestionType::SingleChoice => {
                    matches!(view.input, AnswerInput::SingleChoice { .. })
                }
                QuestionType::MultiChoice => matches!(view.input, AnswerInput::MultiChoice { .. }),
                QuestionType::Text => matches!(view.input, AnswerInput::Text { .. }),
                QuestionType::ImageUpload => {
                    matches!(view.input, AnswerInput::ImageUpload { .. })
                }
            };
            assert!(matches_type, "{label}");
        }
    }

    #[test]
    fn toggle_reads_and_rewrites_full_selection() {
        let question = fixtures::multi_choice("q1", &["A", "B", "C"]);
        let first = toggle_option(&question, None, "B", false).unwrap();
        let second = toggle_option(&question, Some(&first), "A", false).unwrap();
        assert_eq!(second, AnswerValue::Selections(vec!["B".to_string(), "A".to_string()]));
        let third = toggle_option(&question, Some(&second), "B", false).unwrap();
        assert_eq!(third, AnswerValue::Selections(vec!["A".to_string()]));
    }

    #[test]
    fn disabled_views_produce_no_edits() {
        let question = fixtures::text("q1");
        assert_eq!(set_text(&question, "hi", true), Err(EditError::Disabled));
        let choice = fixtures::single_choice("q2", &["A"]);
        assert_eq!(select_option(&choice, "A", true), Err(EditError::Disabled));
    }

    #[test]
    fn parse_answer_accepts_labels_and_positions() {
        let single = fixtures::single_choice("q1", &["Paris", "Rome"]);
        assert_eq!(
            parse_answer(&single, "2", false).unwrap(),
            AnswerValue::Text("Rome".to_string())
        );
        assert_eq!(
            parse_answer(&single, "Paris", false).unwrap(),
            AnswerValue::Text("Paris".to_string())
        );
        assert!(matches!(
            parse_answer(&single, "Berlin", false),
            Err(EditError::UnknownOption(_))
        ));

        let multi = fixtures::multi_choice("q2", &["A", "B", "C"]);
        assert_eq!(
            parse_answer(&multi, "1, C, 1", false).unwrap(),
            AnswerValue::Selections(vec!["A".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn upload_metadata_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Answer.PNG");
        std::fs::write(&path, [0_u8; 16]).unwrap();

        let meta = upload_metadata_from_path(&path).unwrap();
        assert_eq!(meta.file_name, "Answer.PNG");
        assert_eq!(meta.file_size, 16);
        assert_eq!(meta.file_type, "image/png");
        assert!(meta.last_modified > 0);

        let question = fixtures::image_upload("q1");
        assert!(attach_upload(&question, meta, false).is_ok());
        assert!(upload_metadata_from_path(&dir.path().join("missing.png")).is_err());
    }

    #[test]
    fn less_common_image_formats_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let question = fixtures::image_upload("q1");
        for (name, mime) in [("scan.tif", "image/tiff"), ("diagram.svg", "image/svg+xml")] {
            let path = dir.path().join(name);
            std::fs::write(&path, [0_u8; 8]).unwrap();
            let meta = upload_metadata_from_path(&path).unwrap();
            assert_eq!(meta.file_type, mime);
            assert!(attach_upload(&question, meta, false).is_ok(), "{name}");
        }

        let notes = dir.path().join("notes.bin");
        std::fs::write(&notes, [0_u8; 8]).unwrap();
        let meta = upload_metadata_from_path(&notes).unwrap();
        assert_eq!(meta.file_type, "application/octet-stream");
        assert!(matches!(attach_upload(&question, meta, false), Err(EditError::Upload(_))));
    }

    #[test]
    fn text_rendering_marks_selection_and_points() {
        let mut question = fixtures::single_choice("q1", &["A", "B"]);
        question.max_score = 2;
        let answer = AnswerValue::Text("A".to_string());
        let rendered = render_text(&render(&question, Some(&answer), 4, true));
        assert!(rendered.starts_with("Question 4 [single choice] (2 points)"));
        assert!(rendered.contains("(*) 1. A"));
        assert!(rendered.contains("( ) 2. B"));
        assert!(rendered.contains("answers are locked"));
    }
}
