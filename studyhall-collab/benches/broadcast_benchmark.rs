use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use studyhall_collab::{
    ConnectionId, MemoryBroker, MemoryPresence, Messenger, PresenceTracker, RoomBroker, RoomEvent,
    RoomHub,
};
use studyhall_core::{
    ChatMessage, ClientFrame, CohortId, GroupId, Member, MessageId, NewGroup, ServerFrame,
    StaticDirectory, UserId, Viewer,
};
use studyhall_groups::GroupService;
use studyhall_store::{GroupStore, StoreConfig};

fn chat_frame() -> ServerFrame {
    ServerFrame::Chat(ChatMessage {
        id: MessageId(42),
        sender: UserId(1),
        sender_name: "Ada".into(),
        body: "Does anyone have the notes from Tuesday's lecture?".into(),
        created_at: Utc::now(),
        reply_to: None,
    })
}

fn bench_chat_encode(c: &mut Criterion) {
    let frame = chat_frame();
    c.bench_function("chat_frame_encode", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });
}

fn bench_client_frame_decode(c: &mut Criterion) {
    let raw = ClientFrame::Chat {
        body: "see you at 6".into(),
        reply_to: Some(MessageId(7)),
    }
    .encode()
    .unwrap();
    c.bench_function("client_frame_decode", |b| {
        b.iter(|| black_box(ClientFrame::decode(black_box(&raw)).unwrap()))
    });
}

fn bench_broadcast_100_connections(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let payload = chat_frame().encode().unwrap();

    c.bench_function("broadcast_100_connections", |b| {
        b.iter(|| {
            rt.block_on(async {
                let broker = MemoryBroker::new(1024);
                let room = GroupId(1);
                let mut receivers = Vec::new();
                for _ in 0..100 {
                    receivers.push(broker.register(room, ConnectionId::new()).await.unwrap());
                }
                let count = broker
                    .broadcast(room, RoomEvent::new(None, payload.clone()))
                    .await
                    .unwrap();
                black_box(count);
            });
        })
    });
}

fn bench_broadcast_1000_events(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let payload: Arc<str> = Arc::from(chat_frame().encode().unwrap());

    c.bench_function("broadcast_1000_events_100_connections", |b| {
        b.iter(|| {
            rt.block_on(async {
                let broker = MemoryBroker::new(2048);
                let room = GroupId(1);
                let mut receivers = Vec::new();
                for _ in 0..100 {
                    receivers.push(broker.register(room, ConnectionId::new()).await.unwrap());
                }
                for _ in 0..1000 {
                    let event = RoomEvent::new(None, payload.clone());
                    broker.broadcast(room, black_box(event)).await.unwrap();
                }
            });
        })
    });
}

fn bench_presence_join_leave(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let presence = MemoryPresence::new();
    let member = Member::new(UserId(1), "Ada");

    c.bench_function("presence_join_leave", |b| {
        b.iter(|| {
            rt.block_on(async {
                presence.join(GroupId(1), &member).await.unwrap();
                black_box(presence.leave(GroupId(1), &member).await.unwrap());
            });
        })
    });
}

fn bench_send_chat_persist_then_broadcast(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = GroupStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
    let ada = Viewer::new(UserId(1), "Ada").in_cohort(CohortId(1));
    let directory = StaticDirectory::new().with_user("t-ada", ada.clone());
    let groups = Arc::new(GroupService::new(Arc::new(store), Arc::new(directory)));
    let messenger = Messenger::new(groups.clone(), RoomHub::in_memory(1024));

    let group = rt
        .block_on(groups.create_group(
            &ada,
            NewGroup {
                name: "Bench".into(),
                description: String::new(),
                cohort: CohortId(1),
                course: None,
                is_private: false,
                max_members: 10,
            },
        ))
        .unwrap();
    let _rx = rt
        .block_on(messenger.hub().broker().register(group.id, ConnectionId::new()))
        .unwrap();

    c.bench_function("send_chat_persist_then_broadcast", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    messenger
                        .send_chat(group.id, &ada, "benchmark message", None)
                        .await
                        .unwrap(),
                );
            });
        })
    });
}

criterion_group!(
    benches,
    bench_chat_encode,
    bench_client_frame_decode,
    bench_broadcast_100_connections,
    bench_broadcast_1000_events,
    bench_presence_join_leave,
    bench_send_chat_persist_then_broadcast,
);
criterion_main!(benches);
