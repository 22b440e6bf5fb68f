//! Call lifecycle announcements and invitation expiry.
//!
//! `call-started` / `call-ended` are produced by the coordinator under its lock
//! and consumed here by a single task, so a room's announcements go out in the
//! order its sessions changed even when the audience lookup has to wait on the
//! store.

use huddle_common::store::ChatStore;
use huddle_voice::{LifecycleEvent, RoomKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::ServerEvent;
use crate::GatewayState;

impl<S: ChatStore> GatewayState<S> {
    /// Start the lifecycle dispatcher and the invitation sweeper.
    pub fn spawn_background(
        &self,
        mut lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
    ) -> Vec<JoinHandle<()>> {
        let dispatcher = {
            let state = self.clone();
            tokio::spawn(async move {
                while let Some(event) = lifecycle.recv().await {
                    state.announce(event).await;
                }
                tracing::debug!("Lifecycle channel closed");
            })
        };

        let sweeper = {
            let state = self.clone();
            let period = state.config.sweep_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    state.sweep_invitations().await;
                }
            })
        };

        vec![dispatcher, sweeper]
    }

    /// Deliver one lifecycle event to everyone who should see it.
    pub async fn announce(&self, event: LifecycleEvent) {
        let room = event.room().clone();
        let server_event = match event {
            LifecycleEvent::Started(started) => {
                tracing::info!(room = %started.room, "📞 Call started");
                ServerEvent::CallStarted(started)
            }
            LifecycleEvent::Ended(ended) => {
                tracing::info!(room = %ended.room, duration = %ended.duration, "📴 Call ended");
                ServerEvent::call_ended(ended)
            }
        };
        self.deliver_to_audience(&room, server_event).await;
    }

    /// Voice channels are visible server-wide, group calls to the group, DM
    /// calls to the pair.
    async fn deliver_to_audience(&self, room: &RoomKey, event: ServerEvent) -> usize {
        match room {
            RoomKey::ServerVoice { .. } => self.registry.broadcast(event).await,
            RoomKey::GroupVoice { group_id } => match self.store.group_members(*group_id).await {
                Ok(members) => {
                    let mut reached = 0;
                    for member in members {
                        if self.registry.send_to_user(member, event.clone()).await {
                            reached += 1;
                        }
                    }
                    reached
                }
                Err(e) => {
                    tracing::warn!(group = group_id, "Cannot resolve call audience: {e}");
                    0
                }
            },
            RoomKey::DmPair {
                min_user_id,
                max_user_id,
            } => {
                let mut reached = 0;
                for user in [*min_user_id, *max_user_id] {
                    if self.registry.send_to_user(user, event.clone()).await {
                        reached += 1;
                    }
                }
                reached
            }
        }
    }

    /// Expire unanswered invitations: the caller hears `call-timeout`, callees
    /// still ringing hear `call-cancelled`.
    pub async fn sweep_invitations(&self) -> usize {
        let expired = self.calls.expire_invitations(self.config.invite_ttl).await;
        for invitation in &expired {
            self.registry
                .send_to(
                    invitation.caller.connection_id,
                    ServerEvent::CallTimeout {
                        target: invitation.target,
                    },
                )
                .await;
            self.notify_cancelled(invitation).await;
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, RoomDescriptor};
    use crate::testing::{drain, Harness};
    use huddle_voice::{CallType, InviteTarget};

    #[tokio::test]
    async fn unanswered_invitation_times_out() {
        let h = Harness::new();
        let mut alice = h.connect(1).await;
        let mut bob = h.connect(2).await;
        let target = InviteTarget::User { user_id: 2 };
        h.state
            .handle(alice.id, ClientEvent::CallInvite { target, call_type: CallType::Audio })
            .await;
        drain(&mut alice.rx);
        drain(&mut bob.rx);

        h.clock.advance(chrono::Duration::seconds(30));
        assert_eq!(h.state.sweep_invitations().await, 0);

        h.clock.advance(chrono::Duration::seconds(31));
        assert_eq!(h.state.sweep_invitations().await, 1);
        assert_eq!(drain(&mut alice.rx), vec![ServerEvent::CallTimeout { target }]);
        assert_eq!(
            drain(&mut bob.rx),
            vec![ServerEvent::CallCancelled { caller_id: 1, target }]
        );

        // Answering after the timeout does nothing.
        h.state
            .handle(bob.id, ClientEvent::CallAccept { caller_id: 1, group_id: None })
            .await;
        assert!(drain(&mut alice.rx).is_empty());
    }

    #[tokio::test]
    async fn group_call_is_announced_to_group_only() {
        let mut h = Harness::new();
        h.store.add_group(3, &[1, 2]);
        let mut alice = h.connect(1).await;
        let mut bob = h.connect(2).await;
        let mut outsider = h.connect(9).await;
        drain(&mut alice.rx);
        drain(&mut bob.rx);
        drain(&mut outsider.rx);

        h.state
            .handle(
                alice.id,
                ClientEvent::JoinVoice {
                    room: RoomDescriptor::GroupVoice { group_id: 3 },
                },
            )
            .await;
        assert_eq!(h.pump_lifecycle().await, 1);

        assert!(drain(&mut alice.rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::CallStarted(_))));
        assert!(matches!(drain(&mut bob.rx).as_slice(), [ServerEvent::CallStarted(_)]));
        assert!(drain(&mut outsider.rx).is_empty());
    }

    #[tokio::test]
    async fn oscillating_room_announces_each_session_in_order() {
        let mut h = Harness::new();
        let mut watcher = h.connect(5).await;
        let a = h.connect(1).await;
        drain(&mut watcher.rx);

        let room = RoomDescriptor::ServerVoice {
            channel_name: "lobby".into(),
        };
        for _ in 0..3 {
            h.state
                .handle(a.id, ClientEvent::JoinVoice { room: room.clone() })
                .await;
            h.clock.advance(chrono::Duration::seconds(2));
            h.state
                .handle(a.id, ClientEvent::LeaveVoice { room: room.clone() })
                .await;
        }
        assert_eq!(h.pump_lifecycle().await, 6);

        let kinds: Vec<&str> = drain(&mut watcher.rx)
            .iter()
            .filter_map(|e| match e {
                ServerEvent::CallStarted(_) => Some("started"),
                ServerEvent::CallEnded { .. } => Some("ended"),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            ["started", "ended", "started", "ended", "started", "ended"]
        );
    }
}
