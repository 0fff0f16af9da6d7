//! # Scenario Tests
//!
//! End-to-end runs through an [`Experiment`], grouped by scenario.
//!
//! - S1: Employment reveal (page q7)
//! - S2: Disconnect and resume mid-step (page q3)
//! - S3: Repeating stage (guessing x3)
//! - S4: Resume from persistent storage
//! - S5: Changing an answer after going back

#![allow(clippy::unwrap_used, clippy::panic)]

use aqsurvey_core::{
    AdvanceOutcome, Condition, DefinitionRegistry, Experiment, FieldDefinition, FieldValue,
    ParticipantId, ResponseRecorder, RevealRule, SessionStatus, SkipPredicate, StageOptions,
    StepDefinition, SurveyError,
};

fn survey() -> DefinitionRegistry {
    let mut builder = DefinitionRegistry::builder("air-pollution");
    builder
        .register_stage("instructions", vec![], StageOptions::default())
        .unwrap();
    builder
        .register_stage(
            "survey",
            vec![
                StepDefinition::new("q3")
                    .field(FieldDefinition::text("State").required())
                    .field(FieldDefinition::text("District")),
                StepDefinition::new("q7")
                    .field(
                        FieldDefinition::choice("Employed", ["Yes", "No"])
                            .required()
                            .reveal(RevealRule::show(
                                Condition::Equals("Yes".into()),
                                ["CommuteYN"],
                            )),
                    )
                    .field(
                        FieldDefinition::choice("CommuteYN", ["Yes", "No"])
                            .hidden()
                            .required(),
                    ),
            ],
            StageOptions::default(),
        )
        .unwrap();
    builder
        .register_stage(
            "guessing",
            vec![StepDefinition::new("guess")
                .field(FieldDefinition::integer("guess_value", Some(0), Some(100)).required())],
            StageOptions::default().repeat(3),
        )
        .unwrap();
    builder
        .register_stage("end", vec![], StageOptions::default())
        .unwrap();
    builder.build().unwrap()
}

fn experiment() -> Experiment {
    Experiment::new(survey(), 1, ResponseRecorder::new()).unwrap()
}

/// Enroll and move past the instructions page.
fn enrolled(experiment: &mut Experiment, id: &str) -> ParticipantId {
    let p = ParticipantId::new(id);
    experiment.enroll(p.clone()).unwrap();
    experiment.attempt_advance(&p).unwrap();
    p
}

fn field_ids(experiment: &Experiment, p: &ParticipantId) -> Vec<String> {
    experiment
        .view(p)
        .unwrap()
        .fields
        .into_iter()
        .map(|f| f.id)
        .collect()
}

// =============================================================================
// S1: EMPLOYMENT REVEAL
// =============================================================================

mod s1_employment_reveal {
    use super::*;

    fn at_q7(experiment: &mut Experiment) -> ParticipantId {
        let p = enrolled(experiment, "p1");
        experiment
            .set_value(&p, "State", FieldValue::single("Delhi"))
            .unwrap();
        experiment.attempt_advance(&p).unwrap();
        assert_eq!(experiment.view(&p).unwrap().step.as_deref(), Some("q7"));
        p
    }

    /// S1.1: CommuteYN is hidden until Employed = Yes.
    #[test]
    fn commute_revealed_only_when_employed() {
        let mut experiment = experiment();
        let p = at_q7(&mut experiment);
        assert_eq!(field_ids(&experiment, &p), vec!["Employed"]);

        experiment
            .set_value(&p, "Employed", FieldValue::single("Yes"))
            .unwrap();
        assert_eq!(field_ids(&experiment, &p), vec!["Employed", "CommuteYN"]);

        experiment
            .set_value(&p, "Employed", FieldValue::single("No"))
            .unwrap();
        assert_eq!(field_ids(&experiment, &p), vec!["Employed"]);
    }

    /// S1.2: The revealed field becomes required.
    #[test]
    fn revealed_field_gates_advance() {
        let mut experiment = experiment();
        let p = at_q7(&mut experiment);
        experiment
            .set_value(&p, "Employed", FieldValue::single("Yes"))
            .unwrap();

        let err = experiment.attempt_advance(&p).unwrap_err();
        assert_eq!(
            err,
            SurveyError::MissingField {
                field_id: "CommuteYN".into()
            }
        );

        experiment
            .set_value(&p, "CommuteYN", FieldValue::single("No"))
            .unwrap();
        assert!(matches!(
            experiment.attempt_advance(&p).unwrap(),
            AdvanceOutcome::Advanced { .. }
        ));
    }

    /// S1.3: Unemployed participants pass without answering CommuteYN.
    #[test]
    fn hidden_field_not_required() {
        let mut experiment = experiment();
        let p = at_q7(&mut experiment);
        experiment
            .set_value(&p, "Employed", FieldValue::single("No"))
            .unwrap();
        experiment.attempt_advance(&p).unwrap();

        let records = experiment.export_for(&p).unwrap();
        assert!(records.iter().all(|r| r.field_id != "CommuteYN"));
    }
}

// =============================================================================
// S2: DISCONNECT AND RESUME
// =============================================================================

mod s2_disconnect_resume {
    use super::*;

    /// S2.1: A draft survives a disconnect; the step is unchanged on reconnect.
    #[test]
    fn draft_survives_disconnect() {
        let mut experiment = experiment();
        let p = enrolled(&mut experiment, "p1");
        experiment
            .set_value(&p, "State", FieldValue::single("Kerala"))
            .unwrap();

        let parked = experiment.disconnect(&p).unwrap();
        assert_eq!(parked.status, SessionStatus::Disconnected);

        let view = experiment.reconnect(&p).unwrap();
        assert_eq!(view.step.as_deref(), Some("q3"));
        assert_eq!(view.drafts.get("State"), Some(&FieldValue::single("Kerala")));
        assert_eq!(view.status, SessionStatus::InStep);
    }

    /// S2.2: Nothing moves while disconnected.
    #[test]
    fn disconnected_participant_cannot_advance() {
        let mut experiment = experiment();
        let p = enrolled(&mut experiment, "p1");
        experiment
            .set_value(&p, "State", FieldValue::single("Kerala"))
            .unwrap();
        experiment.disconnect(&p).unwrap();

        assert!(matches!(
            experiment.attempt_advance(&p),
            Err(SurveyError::Disconnected(_))
        ));
        assert_eq!(experiment.export_for(&p).unwrap().len(), 0);
    }

    /// S2.3: Re-enrolling is a reconnect, not a fresh session.
    #[test]
    fn reenroll_resumes() {
        let mut experiment = experiment();
        let p = enrolled(&mut experiment, "p1");
        experiment
            .set_value(&p, "State", FieldValue::single("Kerala"))
            .unwrap();
        experiment.disconnect(&p).unwrap();

        let view = experiment.enroll(p.clone()).unwrap();
        assert_eq!(view.step.as_deref(), Some("q3"));
        assert_eq!(view.steps_completed, 1);
    }
}

// =============================================================================
// S3: REPEATING STAGE
// =============================================================================

mod s3_repeat_iterations {
    use super::*;

    /// S3.1: guess x3 yields three records with iterations 0, 1, 2.
    #[test]
    fn three_iterations_three_records() {
        let mut experiment = experiment();
        let p = enrolled(&mut experiment, "p1");
        experiment
            .set_value(&p, "State", FieldValue::single("Kerala"))
            .unwrap();
        experiment.attempt_advance(&p).unwrap();
        experiment
            .set_value(&p, "Employed", FieldValue::single("No"))
            .unwrap();
        experiment.attempt_advance(&p).unwrap();

        for guess in ["10", "55", "90"] {
            let view = experiment.view(&p).unwrap();
            assert_eq!(view.step.as_deref(), Some("guess"));
            assert!(view.drafts.is_empty());
            experiment
                .set_value(&p, "guess_value", FieldValue::single(guess))
                .unwrap();
            experiment.attempt_advance(&p).unwrap();
        }

        let guesses: Vec<(u32, String)> = experiment
            .export_for(&p)
            .unwrap()
            .into_iter()
            .filter(|r| r.field_id == "guess_value")
            .map(|r| (r.iteration, r.value.to_cell()))
            .collect();
        assert_eq!(
            guesses,
            vec![(0, "10".into()), (1, "55".into()), (2, "90".into())]
        );
        assert_eq!(experiment.view(&p).unwrap().step.as_deref(), Some("end"));
    }

    /// S3.2: Out-of-range guesses are rejected as invalid values.
    #[test]
    fn out_of_range_guess_rejected() {
        let mut experiment = experiment();
        let p = enrolled(&mut experiment, "p1");
        experiment
            .set_value(&p, "State", FieldValue::single("Kerala"))
            .unwrap();
        experiment.attempt_advance(&p).unwrap();
        experiment
            .set_value(&p, "Employed", FieldValue::single("No"))
            .unwrap();
        experiment.attempt_advance(&p).unwrap();

        experiment
            .set_value(&p, "guess_value", FieldValue::single("101"))
            .unwrap();
        let err = experiment.attempt_advance(&p).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, SurveyError::InvalidValue { .. }));
    }
}

// =============================================================================
// S4: PERSISTENT RESUME
// =============================================================================

mod s4_persistent_resume {
    use super::*;

    /// S4.1: Sessions and records survive reopening the store.
    #[test]
    fn resume_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("air.redb");
        let p = ParticipantId::new("p1");

        {
            let recorder = ResponseRecorder::with_redb(&path).unwrap();
            let mut experiment = Experiment::new(survey(), 1, recorder).unwrap();
            experiment.enroll(p.clone()).unwrap();
            experiment.attempt_advance(&p).unwrap();
            experiment
                .set_value(&p, "State", FieldValue::single("Kerala"))
                .unwrap();
            experiment.attempt_advance(&p).unwrap();
            experiment
                .set_value(&p, "Employed", FieldValue::single("Yes"))
                .unwrap();
        }

        let recorder = ResponseRecorder::with_redb(&path).unwrap();
        let experiment = Experiment::new(survey(), 1, recorder).unwrap();
        let view = experiment.view(&p).unwrap();
        assert_eq!(view.step.as_deref(), Some("q7"));
        assert_eq!(view.drafts.get("Employed"), Some(&FieldValue::single("Yes")));
        assert_eq!(experiment.export_for(&p).unwrap().len(), 1);
        assert!(experiment.status().unwrap().persistent);
    }
}

// =============================================================================
// S5: CHANGED ANSWER AFTER REWIND
// =============================================================================

mod s5_changed_answer_after_rewind {
    use super::*;

    /// q7 reveals CommuteYN and sets a flag that skips q8.
    fn commute_survey() -> DefinitionRegistry {
        let mut builder = DefinitionRegistry::builder("commute");
        builder
            .register_stage(
                "survey",
                vec![
                    StepDefinition::new("q3").field(FieldDefinition::text("State").required()),
                    StepDefinition::new("q7")
                        .field(
                            FieldDefinition::choice("Employed", ["Yes", "No"])
                                .required()
                                .flag("is_employed")
                                .reveal(RevealRule::show(
                                    Condition::Equals("Yes".into()),
                                    ["CommuteYN"],
                                )),
                        )
                        .field(
                            FieldDefinition::choice("CommuteYN", ["Yes", "No"])
                                .hidden()
                                .required(),
                        ),
                    StepDefinition::new("q8")
                        .skip_when(SkipPredicate::on_flag(
                            "is_employed",
                            Condition::Equals("No".into()),
                        ))
                        .field(FieldDefinition::text("CommuteMode").required()),
                ],
                StageOptions::default(),
            )
            .unwrap();
        builder
            .register_stage("end", vec![], StageOptions::default())
            .unwrap();
        builder.build().unwrap()
    }

    fn answer(experiment: &mut Experiment, p: &ParticipantId, values: &[(&str, &str)]) {
        for (field, value) in values {
            experiment
                .set_value(p, field, FieldValue::single(*value))
                .unwrap();
        }
        experiment.attempt_advance(p).unwrap();
    }

    /// Employed, with CommuteYN and q8 answered, then back to q7 to say No.
    fn walk_and_revise(experiment: &mut Experiment, p: &ParticipantId) {
        experiment.enroll(p.clone()).unwrap();
        answer(experiment, p, &[("State", "Kerala")]);
        answer(experiment, p, &[("Employed", "Yes"), ("CommuteYN", "Yes")]);
        answer(experiment, p, &[("CommuteMode", "Bus")]);
        assert_eq!(experiment.view(p).unwrap().step.as_deref(), Some("end"));

        experiment.rewind(p).unwrap();
        experiment.rewind(p).unwrap();
        assert_eq!(experiment.view(p).unwrap().step.as_deref(), Some("q7"));
        answer(experiment, p, &[("Employed", "No")]);
    }

    fn exported(experiment: &Experiment, p: &ParticipantId) -> Vec<(String, String, String)> {
        experiment
            .export_for(p)
            .unwrap()
            .into_iter()
            .map(|r| (r.step, r.field_id, r.value.to_cell()))
            .collect()
    }

    fn expected() -> Vec<(String, String, String)> {
        [("q3", "State", "Kerala"), ("q7", "Employed", "No")]
            .into_iter()
            .map(|(s, f, v)| (s.to_string(), f.to_string(), v.to_string()))
            .collect()
    }

    /// S5.1: Only the answers on the final path are exported.
    #[test]
    fn export_matches_final_path() {
        let mut experiment = Experiment::new(commute_survey(), 1, ResponseRecorder::new()).unwrap();
        let p = ParticipantId::new("p1");
        walk_and_revise(&mut experiment, &p);

        assert_eq!(experiment.view(&p).unwrap().step.as_deref(), Some("end"));
        assert_eq!(exported(&experiment, &p), expected());

        let steps: Vec<String> = experiment.timings().into_iter().map(|t| t.step).collect();
        assert_eq!(steps, vec!["q3", "q7"]);
    }

    /// S5.2: Dropped answers stay gone after reopening the store.
    #[test]
    fn dropped_answers_stay_dropped_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commute.redb");
        let p = ParticipantId::new("p1");

        {
            let recorder = ResponseRecorder::with_redb(&path).unwrap();
            let mut experiment = Experiment::new(commute_survey(), 1, recorder).unwrap();
            walk_and_revise(&mut experiment, &p);
        }

        let recorder = ResponseRecorder::with_redb(&path).unwrap();
        let experiment = Experiment::new(commute_survey(), 1, recorder).unwrap();
        assert_eq!(exported(&experiment, &p), expected());
        assert_eq!(experiment.status().unwrap().records, 2);
    }

    /// S5.3: Saying Yes again asks for the commute answers afresh.
    #[test]
    fn revealed_again_requires_answer() {
        let mut experiment = Experiment::new(commute_survey(), 1, ResponseRecorder::new()).unwrap();
        let p = ParticipantId::new("p1");
        walk_and_revise(&mut experiment, &p);

        experiment.rewind(&p).unwrap();
        experiment
            .set_value(&p, "Employed", FieldValue::single("Yes"))
            .unwrap();
        assert_eq!(
            experiment.attempt_advance(&p).unwrap_err(),
            SurveyError::MissingField {
                field_id: "CommuteYN".into()
            }
        );
    }
}
