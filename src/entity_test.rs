//! Unit tests for entity projections and the wire-stable delta format.

use serde_json::json;

use crate::entity::Delta;
use crate::entity::EntityInfo;
use crate::entity::EntityKey;
use crate::entity::EntityKind;
use crate::entity::MachineInfo;
use crate::entity::RelationInfo;
use crate::entity::ServiceInfo;
use crate::entity::UnitInfo;

#[test]
fn projections_are_consistent() {
    let entities = vec![
        (
            EntityInfo::Machine(MachineInfo {
                id: "0".into(),
                ..Default::default()
            }),
            EntityKind::Machine,
            "0",
        ),
        (
            EntityInfo::Service(ServiceInfo {
                name: "wordpress".into(),
                exposed: true,
                ..Default::default()
            }),
            EntityKind::Service,
            "wordpress",
        ),
        (
            EntityInfo::Unit(UnitInfo {
                name: "wordpress/0".into(),
                service: "wordpress".into(),
                ..Default::default()
            }),
            EntityKind::Unit,
            "wordpress/0",
        ),
        (
            EntityInfo::Relation(RelationInfo {
                key: "logging:dir wordpress:dir".into(),
            }),
            EntityKind::Relation,
            "logging:dir wordpress:dir",
        ),
    ];

    for (info, kind, id) in entities {
        assert_eq!(info.kind(), kind);
        assert_eq!(info.id(), id);
        assert_eq!(info.key(), EntityKey::new(kind, id));
    }
}

#[test]
fn key_display_is_kind_slash_id() {
    let key = EntityKey::new(EntityKind::Machine, "42");
    assert_eq!(key.to_string(), "machine/42");
    assert_eq!(EntityKind::Unit.to_string(), "unit");
}

#[test]
fn delta_wire_format_is_tagged_by_kind() {
    let delta = Delta::updated(EntityInfo::Machine(MachineInfo {
        id: "0".into(),
        instance_id: Some("i-0".into()),
        status: None,
    }));

    let value = serde_json::to_value(&delta).expect("serialize");
    assert_eq!(
        value,
        json!({
            "entity": {
                "kind": "machine",
                "id": "0",
                "instance_id": "i-0",
                "status": null,
            },
            "removed": false,
        })
    );

    let back: Delta = serde_json::from_value(value).expect("deserialize");
    assert_eq!(back, delta);
}

#[test]
fn removal_delta_round_trips() {
    let delta = Delta::removed(EntityInfo::Service(ServiceInfo {
        name: "wordpress".into(),
        ..Default::default()
    }));
    let text = serde_json::to_string(&delta).expect("serialize");
    let back: Delta = serde_json::from_str(&text).expect("deserialize");
    assert!(back.removed);
    assert_eq!(back.entity.key(), EntityKey::new(EntityKind::Service, "wordpress"));
}

#[test]
fn missing_removed_field_defaults_to_false() {
    let text = r#"{"entity":{"kind":"relation","key":"a:b c:d"}}"#;
    let delta: Delta = serde_json::from_str(text).expect("deserialize");
    assert!(!delta.removed);
    assert_eq!(delta.entity.kind(), EntityKind::Relation);
}
