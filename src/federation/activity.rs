// 出站联邦活动
// 只保留投递所需的最小 ActivityStreams 结构，不处理签名与 JSON-LD 展开

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::Group;

pub const ACTIVITY_STREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Follow,
    Undo,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub actor: String,
    pub object: ActivityObject,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActivityObject {
    Link(String),
    Activity(Box<Activity>),
    Group(GroupObject),
}

/// 群组的公开表示，随 Update 活动发送
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub preferred_username: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub inbox: String,
}

impl Activity {
    pub fn follow(id: String, actor: String, object: String) -> Self {
        Activity {
            context: Some(ACTIVITY_STREAMS_CONTEXT.to_string()),
            id,
            kind: ActivityKind::Follow,
            actor,
            object: ActivityObject::Link(object),
            to: Vec::new(),
        }
    }

    /// 撤销一个之前发出的活动，内嵌的活动不再携带 @context
    pub fn undo(id: String, mut inner: Activity) -> Self {
        inner.context = None;
        Activity {
            context: Some(ACTIVITY_STREAMS_CONTEXT.to_string()),
            id,
            kind: ActivityKind::Undo,
            actor: inner.actor.clone(),
            object: ActivityObject::Activity(Box::new(inner)),
            to: Vec::new(),
        }
    }

    pub fn update_group(id: String, group: GroupObject) -> Self {
        Activity {
            context: Some(ACTIVITY_STREAMS_CONTEXT.to_string()),
            id,
            kind: ActivityKind::Update,
            actor: group.id.clone(),
            object: ActivityObject::Group(group),
            to: vec![PUBLIC_COLLECTION.to_string()],
        }
    }
}

/// 本站对象的 URI 生成规则
#[derive(Debug, Clone)]
pub struct LocalUris {
    base: String,
}

impl LocalUris {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn user(&self, user_id: i64) -> String {
        format!("{}/users/{}", self.base, user_id)
    }

    pub fn group(&self, group_id: i64) -> String {
        format!("{}/groups/{}", self.base, group_id)
    }

    pub fn group_inbox(&self, group_id: i64) -> String {
        format!("{}/groups/{}/inbox", self.base, group_id)
    }

    /// 同一 (用户, 群组) 的 Follow 总是使用同一个 id，Undo 据此指向被撤销的 Follow
    pub fn follow_id(&self, user_id: i64, group_id: i64) -> String {
        format!("{}/users/{}#follows/{}", self.base, user_id, group_id)
    }

    pub fn new_activity_id(&self) -> String {
        format!("{}/activities/{}", self.base, Uuid::new_v4())
    }

    pub fn group_object(&self, group: &Group) -> GroupObject {
        GroupObject {
            kind: "Group".to_string(),
            id: self.group(group.id),
            preferred_username: group.username.clone(),
            name: group.name.clone(),
            summary: group.about.clone(),
            inbox: self.group_inbox(group.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_embeds_follow_without_context() {
        let uris = LocalUris::new("https://groups.test/");
        let follow = Activity::follow(
            uris.new_activity_id(),
            uris.user(3),
            "https://remote.example/groups/chess".into(),
        );
        let undo = Activity::undo(uris.new_activity_id(), follow.clone());

        let json = serde_json::to_value(&undo).unwrap();
        assert_eq!(json["type"], "Undo");
        assert_eq!(json["actor"], "https://groups.test/users/3");
        assert_eq!(json["object"]["type"], "Follow");
        assert_eq!(json["object"]["object"], "https://remote.example/groups/chess");
        assert!(json["object"].get("@context").is_none());
        assert_eq!(json["@context"], ACTIVITY_STREAMS_CONTEXT);
    }

    #[test]
    fn payloads_parse_back_into_the_same_shape() {
        let uris = LocalUris::new("https://groups.test");
        let follow = Activity::follow("f1".into(), uris.user(1), "https://r.example/g".into());
        let undo = Activity::undo("u1".into(), follow);
        let text = serde_json::to_string(&undo).unwrap();
        let parsed: Activity = serde_json::from_str(&text).unwrap();
        match parsed.object {
            ActivityObject::Activity(inner) => assert_eq!(inner.kind, ActivityKind::Follow),
            other => panic!("unexpected object: {other:?}"),
        }
    }

    #[test]
    fn follow_ids_are_stable_per_user_and_group() {
        let uris = LocalUris::new("https://groups.test");
        assert_eq!(uris.follow_id(3, 8), "https://groups.test/users/3#follows/8");
        assert_eq!(uris.follow_id(3, 8), uris.follow_id(3, 8));
        assert_ne!(uris.follow_id(3, 8), uris.follow_id(8, 3));
        assert_ne!(uris.new_activity_id(), uris.new_activity_id());
    }
}
