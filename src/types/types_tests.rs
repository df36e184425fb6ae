use super::*;

#[test]
fn test_sender_parsing() {
    assert_eq!("USER".parse::<Sender>().unwrap(), Sender::User);
    assert_eq!("user".parse::<Sender>().unwrap(), Sender::User);
    assert_eq!("AI".parse::<Sender>().unwrap(), Sender::Ai);
    assert_eq!("assistant".parse::<Sender>().unwrap(), Sender::Ai);
    assert!("bot".parse::<Sender>().is_err());
}

#[test]
fn test_sender_serialize_uppercase() {
    assert_eq!(serde_json::to_string(&Sender::User).unwrap(), "\"USER\"");
    assert_eq!(serde_json::to_string(&Sender::Ai).unwrap(), "\"AI\"");
}

#[test]
fn test_message_ids_are_unique() {
    let now = Utc::now();
    let a = Message::new("s1", Sender::User, "hello", "chatgpt", now);
    let b = Message::new("s1", Sender::User, "hello", "chatgpt", now);
    assert_ne!(a.id, b.id);
    assert_eq!(a.text, b.text);
}

#[test]
fn test_threat_level_ordering() {
    assert!(ThreatLevel::None < ThreatLevel::Low);
    assert!(ThreatLevel::High < ThreatLevel::Critical);
    assert_eq!(ThreatLevel::Critical.rank(), 4);
}

#[test]
fn test_threat_level_from_match_count() {
    assert_eq!(ThreatLevel::from_match_count(0), ThreatLevel::None);
    assert_eq!(ThreatLevel::from_match_count(1), ThreatLevel::Low);
    assert_eq!(ThreatLevel::from_match_count(2), ThreatLevel::Medium);
    assert_eq!(ThreatLevel::from_match_count(4), ThreatLevel::High);
    assert_eq!(ThreatLevel::from_match_count(9), ThreatLevel::Critical);
}

#[test]
fn test_module_id_string_conversion() {
    for id in ModuleId::ALL {
        assert_eq!(id.as_str().parse::<ModuleId>().unwrap(), id);
    }
    assert!("sentiment".parse::<ModuleId>().is_err());
}

#[test]
fn test_module_result_clamps_scores() {
    let result = ModuleResult::new(ModuleId::Emotion, 1.7, -0.2);
    assert_eq!(result.score, 1.0);
    assert_eq!(result.confidence, 0.0);

    let result = ModuleResult::new(ModuleId::Emotion, f64::NAN, f64::INFINITY);
    assert_eq!(result.score, 0.0);
    assert_eq!(result.confidence, 0.0);
}

#[test]
fn test_into_fallback_caps_confidence_and_flags() {
    let result = ModuleResult::new(ModuleId::Manipulation, 0.6, 0.9).into_fallback(0.3);
    assert!(result.fallback);
    assert_eq!(result.confidence, 0.3);
    assert_eq!(result.flags, vec!["fallback".to_string()]);

    // Lower confidence is kept, flag not duplicated
    let result = ModuleResult::new(ModuleId::Manipulation, 0.6, 0.1)
        .into_fallback(0.3)
        .into_fallback(0.3);
    assert_eq!(result.confidence, 0.1);
    assert_eq!(result.flags.len(), 1);
}

#[test]
fn test_module_result_serialize() {
    let result = ModuleResult::new(ModuleId::PromptInjection, 0.8, 0.7)
        .with_flag("instruction_override")
        .with_action(RecommendedAction::Block);
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["module"], "prompt_injection");
    assert_eq!(json["recommended_action"], "block");
    assert_eq!(json["flags"][0], "instruction_override");
}

#[test]
fn test_evidence_weight_clamped() {
    let e = Evidence::new("pattern", "act as", 3.0);
    assert_eq!(e.weight, 1.0);
}
