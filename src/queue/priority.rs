//! Four bounded FIFO lanes with strict priority between them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::domain::{DataJudRequest, Priority};
use crate::observability::metrics;
use crate::queue::{QueueError, QueueResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneCapacities {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl Default for LaneCapacities {
    fn default() -> Self {
        Self {
            urgent: 1_000,
            high: 5_000,
            normal: 10_000,
            low: 20_000,
        }
    }
}

impl LaneCapacities {
    pub fn for_priority(&self, priority: Priority) -> usize {
        match priority {
            Priority::Urgent => self.urgent,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

fn lane(priority: Priority) -> usize {
    match priority {
        Priority::Urgent => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

#[derive(Debug)]
pub struct PriorityQueues {
    lanes: Mutex<[VecDeque<DataJudRequest>; 4]>,
    capacities: LaneCapacities,
    notify: Notify,
}

impl PriorityQueues {
    pub fn new(capacities: LaneCapacities) -> Self {
        Self {
            lanes: Mutex::new(Default::default()),
            capacities,
            notify: Notify::new(),
        }
    }

    pub fn capacities(&self) -> LaneCapacities {
        self.capacities
    }

    pub fn has_room(&self, priority: Priority) -> bool {
        self.lanes.lock()[lane(priority)].len() < self.capacities.for_priority(priority)
    }

    /// Append to the lane for the request's priority.
    pub fn push(&self, request: DataJudRequest) -> QueueResult<()> {
        let priority = request.priority;
        let capacity = self.capacities.for_priority(priority);
        let depth = {
            let mut lanes = self.lanes.lock();
            let queue = &mut lanes[lane(priority)];
            if queue.len() >= capacity {
                return Err(QueueError::Full { priority, capacity });
            }
            queue.push_back(request);
            queue.len()
        };
        metrics::record_queue_depth(priority.as_str(), depth);
        self.notify.notify_one();
        Ok(())
    }

    /// Remove the oldest eligible request from the most urgent non-empty lane.
    pub fn pop_eligible(&self, now: DateTime<Utc>) -> Option<DataJudRequest> {
        let mut lanes = self.lanes.lock();
        for priority in Priority::DESCENDING {
            let queue = &mut lanes[lane(priority)];
            if let Some(index) = queue.iter().position(|r| r.is_eligible(now)) {
                let request = queue.remove(index);
                metrics::record_queue_depth(priority.as_str(), queue.len());
                return request;
            }
        }
        None
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lanes.lock().iter().any(|q| q.iter().any(|r| r.id == id))
    }

    pub fn len_for(&self, priority: Priority) -> usize {
        self.lanes.lock()[lane(priority)].len()
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves when something is pushed.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Wake every waiting worker.
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RequestType;
    use std::time::Duration;

    fn request(priority: Priority, now: DateTime<Utc>) -> DataJudRequest {
        DataJudRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            RequestType::Process,
            priority,
            "00012345620238260100",
            "tjsp",
            now,
        )
    }

    #[test]
    fn urgent_before_low_regardless_of_arrival() {
        let now = Utc::now();
        let queues = PriorityQueues::new(LaneCapacities::default());
        let low = request(Priority::Low, now);
        let urgent = request(Priority::Urgent, now);
        let (low_id, urgent_id) = (low.id, urgent.id);
        queues.push(low).unwrap();
        queues.push(urgent).unwrap();

        assert_eq!(queues.pop_eligible(now).unwrap().id, urgent_id);
        assert_eq!(queues.pop_eligible(now).unwrap().id, low_id);
        assert!(queues.pop_eligible(now).is_none());
    }

    #[test]
    fn fifo_within_a_lane() {
        let now = Utc::now();
        let queues = PriorityQueues::new(LaneCapacities::default());
        let ids: Vec<Uuid> = (0..3)
            .map(|_| {
                let r = request(Priority::Normal, now);
                let id = r.id;
                queues.push(r).unwrap();
                id
            })
            .collect();
        let popped: Vec<Uuid> = std::iter::from_fn(|| queues.pop_eligible(now)).map(|r| r.id).collect();
        assert_eq!(popped, ids);
    }

    #[test]
    fn deferred_items_are_skipped_until_due() {
        let now = Utc::now();
        let queues = PriorityQueues::new(LaneCapacities::default());
        let mut deferred = request(Priority::Urgent, now);
        deferred.schedule_retry(Duration::from_secs(60), now).unwrap();
        deferred.requeue().unwrap();
        let ready = request(Priority::Low, now);
        let ready_id = ready.id;
        queues.push(deferred).unwrap();
        queues.push(ready).unwrap();

        assert_eq!(queues.pop_eligible(now).unwrap().id, ready_id);
        assert!(queues.pop_eligible(now).is_none());
        assert!(queues.pop_eligible(now + chrono::Duration::seconds(61)).is_some());
    }

    #[test]
    fn lanes_are_bounded() {
        let now = Utc::now();
        let queues = PriorityQueues::new(LaneCapacities {
            urgent: 1,
            ..LaneCapacities::default()
        });
        queues.push(request(Priority::Urgent, now)).unwrap();
        assert!(!queues.has_room(Priority::Urgent));
        let err = queues.push(request(Priority::Urgent, now)).unwrap_err();
        assert!(matches!(err, QueueError::Full { capacity: 1, .. }));
        assert!(queues.push(request(Priority::High, now)).is_ok());
        assert_eq!(queues.len(), 2);
    }
}
