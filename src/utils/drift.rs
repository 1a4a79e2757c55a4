use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use crate::room::Rooms;

/// 定時巡房：each tick drops a drift check into every live room's mailbox.
/// The owner decides whether anything is due, so this never touches state.
pub async fn task(rooms: Rooms, every: Duration) {
    let mut tick = time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        for h in rooms.handles().await {
            h.poke_drift();
        }
    }
}
