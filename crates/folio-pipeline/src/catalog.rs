use crate::gate::{GateSpec, Predicate};
use crate::registry::{TaskDefinition, TaskRegistry};
use folio_core::FolioResult;
use serde_json::json;

/// Repair rounds each built-in task gets within one attempt.
pub const DEFAULT_MAX_REPAIRS: u32 = 2;

fn non_empty(field: &str) -> Predicate {
    Predicate::NonEmpty {
        field: field.to_string(),
    }
}

/// Task definitions of the built-in book-development pipeline.
///
/// Layers run strategy → story system → structure → voice → draft → quality
/// → release. Gates check structure only; literary quality is left to the
/// generation collaborator.
pub fn default_definitions() -> Vec<TaskDefinition> {
    let definitions = vec![
        // Strategic foundation
        TaskDefinition::new("market_intelligence", 1)
            .with_name("Market & Reader Intelligence")
            .with_purpose("Analyze market demand and define the target reader")
            .with_inputs(["genre", "comparable_titles"])
            .with_outputs(["reader_avatar", "market_gap", "positioning_angle", "comp_analysis"])
            .with_gate(GateSpec::new(vec![non_empty("positioning_angle")]))
            .with_fail_condition("Commodity concept with no unique angle"),
        TaskDefinition::new("concept_definition", 2)
            .with_name("Core Concept Definition")
            .with_purpose("Define the book's core promise and unique value")
            .with_dependencies(["market_intelligence"])
            .with_inputs(["market_gap", "positioning_angle", "user_vision"])
            .with_outputs(["one_line_hook", "core_promise", "unique_engine", "elevator_pitch"])
            .with_gate(GateSpec::new(vec![
                non_empty("one_line_hook"),
                Predicate::MaxLength {
                    field: "one_line_hook".into(),
                    max: 280,
                },
            ]))
            .with_fail_condition("Vague or generic premise"),
        TaskDefinition::new("thematic_architecture", 3)
            .with_name("Thematic Architecture")
            .with_purpose("Establish the meaning layer and value conflicts")
            .with_dependencies(["concept_definition"])
            .with_inputs(["core_promise", "unique_engine"])
            .with_outputs(["primary_theme", "counter_theme", "value_conflict", "thematic_question"])
            .with_gate(GateSpec::new(vec![non_empty("value_conflict")]))
            .with_fail_condition("Theme is decorative only, not structural"),
        TaskDefinition::new("story_question", 4)
            .with_name("Central Story Question")
            .with_purpose("Define the narrative's central dramatic question")
            .with_dependencies(["thematic_architecture"])
            .with_inputs(["primary_theme", "value_conflict", "core_promise"])
            .with_outputs(["central_dramatic_question", "stakes_ladder", "binary_outcome"])
            .with_gate(GateSpec::new(vec![non_empty("stakes_ladder")]))
            .with_fail_condition("No real loss if the protagonist fails"),
        // Story system
        TaskDefinition::new("world_rules", 5)
            .with_name("World / Context Rules")
            .with_purpose("Define the constraints and rules of the story world")
            .with_dependencies(["story_question"])
            .with_inputs(["central_dramatic_question", "genre"])
            .with_outputs(["physical_rules", "social_rules", "power_rules", "constraint_list"])
            .with_fail_condition("Rules break plot or remove tension"),
        TaskDefinition::new("character_architecture", 6)
            .with_name("Character Architecture")
            .with_purpose("Design characters as agents of thematic change")
            .with_dependencies(["world_rules"])
            .with_inputs(["primary_theme", "central_dramatic_question", "world_rules"])
            .with_outputs([
                "protagonist_profile",
                "protagonist_arc",
                "want_vs_need",
                "antagonist_profile",
                "supporting_cast",
            ])
            .with_gate(GateSpec::new(vec![non_empty("protagonist_arc")]))
            .with_fail_condition("Passive protagonist or purposeless characters"),
        TaskDefinition::new("relationship_dynamics", 7)
            .with_name("Relationship Dynamics")
            .with_purpose("Map the emotional engine through character relationships")
            .with_dependencies(["character_architecture"])
            .with_inputs(["character_architecture", "value_conflict"])
            .with_outputs(["conflict_web", "power_shifts", "relationship_matrix"])
            .with_fail_condition("Static interactions that don't change"),
        TaskDefinition::new("story_bible", 7)
            .with_name("Story Bible")
            .with_purpose("Lock canonical facts so every chapter stays consistent")
            .with_dependencies(["relationship_dynamics"])
            .with_inputs(["character_architecture", "world_rules", "relationship_dynamics"])
            .with_outputs(["character_registry", "location_registry", "timeline", "consistency_rules"])
            .with_fail_condition("Missing key character details or conflicting facts"),
        // Structural engine
        TaskDefinition::new("plot_structure", 8)
            .with_name("Macro Plot Structure")
            .with_purpose("Design the story's momentum and major beats")
            .with_dependencies(["relationship_dynamics"])
            .with_inputs(["central_dramatic_question", "protagonist_arc"])
            .with_outputs(["act_structure", "major_beats", "climax_design", "resolution"])
            .with_fail_condition("Flat middle or unearned climax"),
        TaskDefinition::new("chapter_blueprint", 9)
            .with_name("Chapter & Scene Blueprint")
            .with_purpose("Create the chapter-by-chapter execution map for writing")
            .with_dependencies(["plot_structure"])
            .with_inputs(["plot_structure", "character_architecture", "target_chapters"])
            .with_outputs(["chapter_outline", "hooks", "pov_assignments"])
            .with_gate(GateSpec::new(vec![Predicate::Sequential {
                field: "chapter_outline".into(),
                key: "number".into(),
            }]))
            .with_fail_condition("Missing or out-of-order chapters"),
        TaskDefinition::new("voice_specification", 10)
            .with_name("Style & Voice Specification")
            .with_purpose("Define consistent narrative voice and style rules")
            .with_dependencies(["chapter_blueprint"])
            .with_inputs(["genre", "reader_avatar", "protagonist_profile"])
            .with_outputs(["narrative_voice", "pov_rules", "tense_rules", "style_guide"])
            .with_gate(GateSpec::new(vec![non_empty("style_guide")]))
            .with_fail_condition("Voice drift or inconsistent tone"),
        // Content generation
        TaskDefinition::new("draft_generation", 11)
            .with_name("Draft Generation")
            .with_purpose("Produce the manuscript chapters")
            .with_dependencies(["voice_specification"])
            .with_inputs(["chapter_blueprint", "voice_specification", "style_guide"])
            .with_outputs(["chapters", "word_counts", "outline_adherence"])
            .with_gate(GateSpec::new(vec![
                Predicate::Sequential {
                    field: "chapters".into(),
                    key: "number".into(),
                },
                Predicate::SameLength {
                    field: "word_counts".into(),
                    other: "chapters".into(),
                },
                Predicate::Range {
                    field: "outline_adherence.overall_score".into(),
                    min: Some(70.0),
                    max: Some(100.0),
                },
            ]))
            .with_fail_condition("Off-outline drift or voice inconsistency"),
        // Quality control
        TaskDefinition::new("continuity_audit", 12)
            .with_name("Continuity & Logic Audit")
            .with_purpose("Verify canon integrity and internal consistency")
            .with_dependencies(["draft_generation", "story_bible"])
            .with_inputs(["chapters", "story_bible", "world_rules"])
            .with_outputs(["timeline_check", "character_logic_check", "continuity_report"])
            .with_fail_condition("Canon breaks or timeline errors"),
        TaskDefinition::new("line_edit", 13)
            .with_name("Line & Copy Edit")
            .with_purpose("Polish prose for precision and rhythm")
            .with_dependencies(["continuity_audit"])
            .with_inputs(["chapters", "style_guide", "continuity_report"])
            .with_outputs(["edited_chapters", "edit_report"])
            .with_gate(GateSpec::new(vec![non_empty("edited_chapters")]))
            .with_fail_condition("Mechanical errors remain"),
        // Release
        TaskDefinition::new("human_editor_review", 14)
            .with_name("Human Editor Review")
            .with_purpose("Review the edited manuscript as a professional editor would")
            .with_dependencies(["line_edit"])
            .with_inputs(["edited_chapters", "concept_definition", "story_question"])
            .with_outputs(["approved", "editorial_letter", "required_changes"])
            .with_gate(GateSpec::new(vec![
                Predicate::When {
                    field: "approved".into(),
                    equals: json!(false),
                    then: vec![non_empty("required_changes")],
                },
                Predicate::When {
                    field: "approved".into(),
                    equals: json!(true),
                    then: vec![Predicate::MaxLength {
                        field: "required_changes".into(),
                        max: 0,
                    }],
                },
            ]))
            .with_fail_condition("Editor requests required changes before publication"),
        TaskDefinition::new("final_validation", 14)
            .with_name("Final Quality Validation")
            .with_purpose("Verify the book delivers its core promise")
            .with_dependencies(["human_editor_review"])
            .with_inputs(["edited_chapters", "core_promise", "primary_theme"])
            .with_outputs(["promise_fulfillment", "release_recommendation"])
            .with_fail_condition("Core promise not delivered"),
        TaskDefinition::new("publishing_package", 15)
            .with_name("Publishing Package")
            .with_purpose("Create market-ready publishing materials")
            .with_dependencies(["final_validation"])
            .with_inputs(["title", "core_promise", "reader_avatar", "positioning_angle"])
            .with_outputs(["blurb", "synopsis", "keywords"])
            .with_gate(GateSpec::new(vec![Predicate::MinLength {
                field: "blurb".into(),
                min: 1,
            }]))
            .with_fail_condition("Weak positioning or missing elements"),
    ];
    definitions
        .into_iter()
        .map(|def| def.with_max_repairs(DEFAULT_MAX_REPAIRS))
        .collect()
}

/// The built-in catalog as a registry.
pub fn default_catalog() -> FolioResult<TaskRegistry> {
    TaskRegistry::new(default_definitions())
}
