// 联邦活动分发
// 入队是同步的；投递由后台任务完成。每个队列键（同一 (用户, 群组)、同一群组的更新、
// 同一群组更新的单个收件箱）有自己的队列，由一个任务逐个投递（包括重试），
// 因此远程看到的顺序与本地提交顺序一致，而某个键在重试等待时不影响其他键。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use super::activity::{Activity, LocalUris};
use super::transport::DeliveryTransport;
use crate::config::Config;
use crate::database::{Group, GroupStore};

/// 单次重试等待的上限
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 同时进行的投递请求上限
    pub workers: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub local_domain: String,
}

impl DispatcherConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.federation_workers,
            max_attempts: config.federation_max_attempts,
            initial_backoff: config.federation_initial_backoff(),
            local_domain: config.local_domain.clone(),
        }
    }
}

/// 需要保持顺序的一组活动
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum QueueKey {
    /// 同一本地用户对同一远程群组的 Follow / Undo
    Member { group_id: i64, user_id: i64 },
    /// 本地群组的资料更新，解析收件人后展开为 `Inbox`
    FanOut { group_id: i64 },
    /// 本地群组的资料更新投递到某个远程收件箱
    Inbox { group_id: i64, inbox: String },
}

#[derive(Debug)]
enum Job {
    /// 投递到单个收件箱
    Deliver { inbox: String, activity: Activity },
    /// 投递到群组所有远程成员的收件箱，收件人在处理时解析
    FanOut { group_id: i64, activity: Activity },
}

impl Job {
    fn activity(&self) -> &Activity {
        match self {
            Job::Deliver { activity, .. } | Job::FanOut { activity, .. } => activity,
        }
    }
}

#[derive(Default)]
struct Queues {
    closed: bool,
    /// 有任务在处理的键；队列清空后任务退出并移除自己的键
    pending: HashMap<QueueKey, VecDeque<Job>>,
}

struct Worker {
    transport: Arc<dyn DeliveryTransport>,
    store: Arc<dyn GroupStore>,
    max_attempts: u32,
    initial_backoff: Duration,
    permits: Semaphore,
    queues: Mutex<Queues>,
    idle: Notify,
    runtime: Handle,
}

impl Worker {
    fn queues(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 追加到键的队列末尾，键没有任务时启动一个
    ///
    /// `internal` 为 true 时来自已入队活动的展开，关闭后依然接收。
    fn push(self: &Arc<Self>, key: QueueKey, job: Job, internal: bool) {
        let mut queues = self.queues();
        if queues.closed && !internal {
            warn!("Dispatcher is shut down, dropping {}", job.activity().id);
            return;
        }
        debug!("Queued {:?} {} for {:?}", job.activity().kind, job.activity().id, key);
        if let Some(queue) = queues.pending.get_mut(&key) {
            queue.push_back(job);
            return;
        }
        queues.pending.insert(key.clone(), VecDeque::from([job]));
        self.runtime.spawn(self.clone().drain(key));
    }

    async fn drain(self: Arc<Self>, key: QueueKey) {
        loop {
            let job = {
                let mut queues = self.queues();
                match queues.pending.get_mut(&key).and_then(VecDeque::pop_front) {
                    Some(job) => job,
                    None => {
                        queues.pending.remove(&key);
                        if queues.pending.is_empty() {
                            self.idle.notify_waiters();
                        }
                        return;
                    }
                }
            };
            self.process(job).await;
        }
    }

    async fn process(self: &Arc<Self>, job: Job) {
        match job {
            Job::Deliver { inbox, activity } => {
                self.deliver_with_retry(&inbox, &activity).await;
            }
            Job::FanOut { group_id, activity } => {
                let inboxes = match self.store.remote_member_inboxes(group_id).await {
                    Ok(inboxes) => inboxes,
                    Err(e) => {
                        error!(
                            "Failed to resolve inboxes for group {}, dropping {}: {}",
                            group_id, activity.id, e
                        );
                        return;
                    }
                };
                debug!(
                    "Fanning out {} to {} inboxes",
                    activity.id,
                    inboxes.len()
                );
                for inbox in inboxes {
                    let key = QueueKey::Inbox {
                        group_id,
                        inbox: inbox.clone(),
                    };
                    let job = Job::Deliver {
                        inbox,
                        activity: activity.clone(),
                    };
                    self.push(key, job, true);
                }
            }
        }
    }

    async fn deliver_with_retry(&self, inbox: &str, activity: &Activity) {
        let mut backoff = self.initial_backoff;
        for attempt in 1..=self.max_attempts {
            let result = {
                // 只在请求期间占用名额，退避等待时不占用
                let _permit = self.permits.acquire().await;
                self.transport.deliver(inbox, activity).await
            };
            match result {
                Ok(()) => return,
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "Delivery of {} to {} failed (attempt {}/{}), retrying in {:?}: {}",
                        activity.id, inbox, attempt, self.max_attempts, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    error!(
                        "Giving up on {} to {} after {} attempts: {}",
                        activity.id, inbox, attempt, e
                    );
                }
            }
        }
    }
}

/// 出站活动分发器
///
/// 在启动时创建并注入到需要它的服务中，退出前调用 [`FederationDispatcher::shutdown`]
/// 等待队列排空。
pub struct FederationDispatcher {
    uris: LocalUris,
    worker: Arc<Worker>,
}

impl FederationDispatcher {
    /// 必须在 tokio 运行时内调用，队列任务在这个运行时上启动
    pub fn start(
        config: DispatcherConfig,
        transport: Arc<dyn DeliveryTransport>,
        store: Arc<dyn GroupStore>,
    ) -> Arc<Self> {
        let workers = config.workers.max(1);
        let worker = Arc::new(Worker {
            transport,
            store,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            permits: Semaphore::new(workers),
            queues: Mutex::new(Queues::default()),
            idle: Notify::new(),
            runtime: Handle::current(),
        });
        info!(
            "Federation dispatcher started with {} concurrent deliveries",
            workers
        );

        Arc::new(Self {
            uris: LocalUris::new(&config.local_domain),
            worker,
        })
    }

    /// 本地用户关注远程群组
    pub fn send_follow(&self, user_id: i64, group: &Group) {
        let Some(follow) = self.follow_activity(user_id, group) else {
            return;
        };
        self.enqueue_for_group_inbox(user_id, group, follow);
    }

    /// 撤销本地用户对远程群组的关注，内嵌的 Follow 与之前发出的 id 相同
    pub fn send_unfollow(&self, user_id: i64, group: &Group) {
        let Some(follow) = self.follow_activity(user_id, group) else {
            return;
        };
        let undo = Activity::undo(self.uris.new_activity_id(), follow);
        self.enqueue_for_group_inbox(user_id, group, undo);
    }

    /// 本地群组资料变更后通知远程成员
    pub fn send_group_update(&self, group: &Group) {
        if group.is_foreign {
            debug!("Skipping update for foreign group {}", group.id);
            return;
        }
        let activity =
            Activity::update_group(self.uris.new_activity_id(), self.uris.group_object(group));
        self.worker.push(
            QueueKey::FanOut { group_id: group.id },
            Job::FanOut {
                group_id: group.id,
                activity,
            },
            false,
        );
    }

    /// 停止接收新活动，等待已入队的活动处理完毕
    pub async fn shutdown(&self) {
        self.worker.queues().closed = true;
        loop {
            let mut idle = std::pin::pin!(self.worker.idle.notified());
            // 先登记再检查，避免错过最后一个队列退出时的通知
            idle.as_mut().enable();
            if self.worker.queues().pending.is_empty() {
                break;
            }
            idle.await;
        }
        info!("Federation dispatcher stopped");
    }

    fn follow_activity(&self, user_id: i64, group: &Group) -> Option<Activity> {
        let Some(group_uri) = group.ap_id.clone().filter(|_| group.is_foreign) else {
            warn!(
                "Group {} has no remote authority, not sending follow activity",
                group.id
            );
            return None;
        };
        Some(Activity::follow(
            self.uris.follow_id(user_id, group.id),
            self.uris.user(user_id),
            group_uri,
        ))
    }

    fn enqueue_for_group_inbox(&self, user_id: i64, group: &Group, activity: Activity) {
        let Some(inbox) = group.inbox.clone() else {
            warn!("Group {} has no inbox, dropping {}", group.id, activity.id);
            return;
        };
        let key = QueueKey::Member {
            group_id: group.id,
            user_id,
        };
        self.worker.push(key, Job::Deliver { inbox, activity }, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ForeignGroupParams, RemoteUserParams};
    use crate::database::{MemoryGroupStore, MembershipState};
    use crate::federation::nullable::RecordingTransport;
    use crate::federation::{ActivityKind, ActivityObject};

    fn test_config(workers: usize, max_attempts: u32) -> DispatcherConfig {
        DispatcherConfig {
            workers,
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            local_domain: "https://groups.test".into(),
        }
    }

    async fn foreign_group(store: &MemoryGroupStore, name: &str) -> Group {
        let base = format!("https://remote.example/groups/{name}");
        store
            .insert_foreign_group(&ForeignGroupParams {
                username: format!("{name}@remote.example"),
                name: name.into(),
                about: None,
                ap_id: base.clone(),
                inbox: format!("{base}/inbox"),
            })
            .await
            .unwrap()
    }

    async fn local_group(store: &MemoryGroupStore, name: &str) -> Group {
        let owner = format!("{name}-owner");
        let owner = store.create_local_user(&owner, &owner, "hash").await.unwrap();
        store.create_group(name, name, owner.id).await.unwrap()
    }

    #[tokio::test]
    async fn follow_and_undo_arrive_in_submission_order() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = foreign_group(&store, "chess").await;
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = FederationDispatcher::start(test_config(4, 3), transport.clone(), store);

        for _ in 0..5 {
            dispatcher.send_follow(9, &group);
            dispatcher.send_unfollow(9, &group);
        }
        dispatcher.shutdown().await;

        let kinds: Vec<ActivityKind> = transport
            .delivered()
            .into_iter()
            .map(|(inbox, activity)| {
                assert_eq!(inbox, "https://remote.example/groups/chess/inbox");
                activity.kind
            })
            .collect();
        assert_eq!(kinds.len(), 10);
        for pair in kinds.chunks(2) {
            assert_eq!(pair, [ActivityKind::Follow, ActivityKind::Undo]);
        }
    }

    #[tokio::test]
    async fn undo_points_at_the_follow_it_cancels() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = foreign_group(&store, "chess").await;
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = FederationDispatcher::start(test_config(1, 1), transport.clone(), store);

        dispatcher.send_follow(3, &group);
        dispatcher.send_unfollow(3, &group);
        dispatcher.shutdown().await;

        let delivered = transport.delivered();
        let (follow, undo) = (&delivered[0].1, &delivered[1].1);
        assert_eq!(follow.kind, ActivityKind::Follow);
        let ActivityObject::Activity(inner) = &undo.object else {
            panic!("undo should embed an activity: {:?}", undo.object);
        };
        assert_eq!(inner.kind, ActivityKind::Follow);
        assert_eq!(inner.id, follow.id);
        assert_ne!(undo.id, follow.id);
    }

    #[tokio::test]
    async fn failed_deliveries_are_retried_then_delivered() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = foreign_group(&store, "chess").await;
        let transport = Arc::new(RecordingTransport::failing_first(2));
        let dispatcher = FederationDispatcher::start(test_config(1, 3), transport.clone(), store);

        dispatcher.send_follow(1, &group);
        dispatcher.shutdown().await;

        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.delivered().len(), 1);
    }

    #[tokio::test]
    async fn deliveries_are_dropped_after_max_attempts() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = foreign_group(&store, "chess").await;
        let transport = Arc::new(RecordingTransport::failing_first(10));
        let dispatcher = FederationDispatcher::start(test_config(1, 2), transport.clone(), store);

        dispatcher.send_follow(1, &group);
        dispatcher.send_unfollow(1, &group);
        dispatcher.shutdown().await;

        assert_eq!(transport.attempts(), 4);
        assert!(transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn retrying_key_does_not_hold_up_other_keys() {
        let store = Arc::new(MemoryGroupStore::new());
        let dead = foreign_group(&store, "dead").await;
        let alive = foreign_group(&store, "alive").await;
        let transport = Arc::new(RecordingTransport::with_dead_inbox(
            "https://remote.example/groups/dead/inbox",
        ));
        let config = DispatcherConfig {
            initial_backoff: Duration::from_millis(200),
            ..test_config(1, 3)
        };
        let dispatcher = FederationDispatcher::start(config, transport.clone(), store);

        dispatcher.send_follow(1, &dead);
        dispatcher.send_follow(2, &alive);

        // 失败的一方要等 200ms + 400ms 才放弃，另一方不应等它
        let delivered = tokio::time::timeout(Duration::from_millis(150), async {
            while transport.delivered().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(delivered.is_ok(), "unrelated follow was held up by retries");
        assert!(transport.attempts() < 4);

        dispatcher.shutdown().await;
        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "https://remote.example/groups/alive/inbox");
        assert_eq!(transport.attempts(), 4);
    }

    #[tokio::test]
    async fn group_update_fans_out_to_remote_members() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = local_group(&store, "knitting").await;
        for (name, inbox) in [
            ("ann@a.example", "https://a.example/inbox"),
            ("bob@b.example", "https://b.example/inbox"),
            ("cid@b.example", "https://b.example/inbox"),
        ] {
            let user = store
                .insert_remote_user(&RemoteUserParams {
                    username: name.into(),
                    nickname: name.into(),
                    ap_id: format!("https://{name}"),
                    inbox: inbox.into(),
                })
                .await
                .unwrap();
            store
                .insert_membership(group.id, user.id, MembershipState::Member)
                .await
                .unwrap();
        }
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher =
            FederationDispatcher::start(test_config(2, 1), transport.clone(), store.clone());

        dispatcher.send_group_update(&group);
        dispatcher.shutdown().await;

        let delivered = transport.delivered();
        let mut inboxes: Vec<&str> = delivered.iter().map(|(inbox, _)| inbox.as_str()).collect();
        inboxes.sort_unstable();
        assert_eq!(inboxes, ["https://a.example/inbox", "https://b.example/inbox"]);
        assert!(delivered.iter().all(|(_, a)| a.kind == ActivityKind::Update));
        assert_eq!(
            delivered[0].1.actor,
            format!("https://groups.test/groups/{}", group.id)
        );
    }

    #[tokio::test]
    async fn shutdown_waits_for_fanned_out_deliveries() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = local_group(&store, "knitting").await;
        let user = store
            .insert_remote_user(&RemoteUserParams {
                username: "ann@a.example".into(),
                nickname: "Ann".into(),
                ap_id: "https://a.example/users/ann".into(),
                inbox: "https://a.example/inbox".into(),
            })
            .await
            .unwrap();
        store
            .insert_membership(group.id, user.id, MembershipState::Member)
            .await
            .unwrap();
        let transport = Arc::new(RecordingTransport::failing_first(2));
        let dispatcher =
            FederationDispatcher::start(test_config(1, 3), transport.clone(), store.clone());

        dispatcher.send_group_update(&group);
        dispatcher.send_group_update(&group);
        dispatcher.shutdown().await;

        assert_eq!(transport.attempts(), 4);
        assert_eq!(transport.delivered().len(), 2);
    }

    #[tokio::test]
    async fn local_groups_never_get_follow_activities() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = local_group(&store, "local").await;
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = FederationDispatcher::start(test_config(1, 1), transport.clone(), store);

        dispatcher.send_follow(2, &group);
        dispatcher.shutdown().await;

        assert!(transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_dropped() {
        let store = Arc::new(MemoryGroupStore::new());
        let group = foreign_group(&store, "chess").await;
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher =
            FederationDispatcher::start(test_config(1, 1), transport.clone(), store);

        dispatcher.shutdown().await;
        dispatcher.send_follow(1, &group);

        assert_eq!(transport.attempts(), 0);
    }
}
