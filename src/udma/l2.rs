use std::collections::VecDeque;
use log::{debug, warn};
use crate::config::UdmaConfig;
use crate::kernel::{IoReqStatus, Scheduler};
use crate::memory::Memory;
use super::channel::ChannelReq;
use super::queue::Queue;
use super::Event;

//the system-memory port shared by all channels. requests are answered
//`latency` cycles after being granted, in order, with a bounded number in
//flight per direction. the rest wait their turn, nothing is ever dropped
pub struct L2Port {
  memory: Memory,
  latency: u64,
  l2_read_reqs: Queue<(u64, ChannelReq)>,
  l2_write_reqs: Queue<(u64, ChannelReq)>,
  l2_read_waiting_reqs: VecDeque<ChannelReq>,
  l2_write_waiting_reqs: VecDeque<ChannelReq>,
}

impl L2Port {
  pub fn new(config: &UdmaConfig) -> Self {
    L2Port {
      memory: Memory::new(config.l2_base, config.l2_size),
      latency: config.l2_latency,
      l2_read_reqs: Queue::new(config.l2_read_fifo_size),
      l2_write_reqs: Queue::new(config.l2_write_fifo_size),
      l2_read_waiting_reqs: VecDeque::new(),
      l2_write_waiting_reqs: VecDeque::new(),
    }
  }

  pub fn memory(&self) -> &Memory {
    &self.memory
  }

  pub fn memory_mut(&mut self) -> &mut Memory {
    &mut self.memory
  }

  pub fn in_flight(&self) -> (usize, usize) {
    (self.l2_read_reqs.len(), self.l2_write_reqs.len())
  }

  pub fn waiting(&self) -> (usize, usize) {
    (self.l2_read_waiting_reqs.len(), self.l2_write_waiting_reqs.len())
  }

  pub fn push_read_req(&mut self, req: ChannelReq, sched: &mut Scheduler<Event>) {
    debug!("L2 read [{:#x}; {}] for {:?}", req.req.addr, req.req.size(), req.channel);
    let due = sched.now() + self.latency;
    if submit(&mut self.l2_read_reqs, &mut self.l2_read_waiting_reqs, req, due) {
      sched.enqueue_at(Event::L2Response, due);
    }
  }

  pub fn push_write_req(&mut self, req: ChannelReq, sched: &mut Scheduler<Event>) {
    debug!("L2 write [{:#x}; {}] for {:?}", req.req.addr, req.req.size(), req.channel);
    let due = sched.now() + self.latency;
    if submit(&mut self.l2_write_reqs, &mut self.l2_write_waiting_reqs, req, due) {
      sched.enqueue_at(Event::L2Response, due);
    }
  }

  //completes the oldest request due by `now`, reads before writes on a tie
  pub fn pop_response(&mut self, now: u64) -> Option<ChannelReq> {
    let read_due = self.l2_read_reqs.first().map(|(due, _)| *due).filter(|&due| due <= now);
    let write_due = self.l2_write_reqs.first().map(|(due, _)| *due).filter(|&due| due <= now);
    let is_read = match (read_due, write_due) {
      (Some(read), Some(write)) => read <= write,
      (Some(_), None) => true,
      (None, Some(_)) => false,
      (None, None) => return None,
    };
    let mut req = match is_read {
      true => self.l2_read_reqs.pop()?.1,
      false => self.l2_write_reqs.pop()?.1,
    };
    self.complete(&mut req);
    //a slot just freed up, let the oldest waiting request in
    let due = now + self.latency;
    let (in_flight, waiting) = match is_read {
      true => (&mut self.l2_read_reqs, &mut self.l2_read_waiting_reqs),
      false => (&mut self.l2_write_reqs, &mut self.l2_write_waiting_reqs),
    };
    if let Some(next) = waiting.pop_front() {
      if let Err((_, next)) = in_flight.push((due, next)) {
        waiting.push_front(next);
      }
    }
    Some(req)
  }

  //arms the response event for the oldest request still in flight
  pub fn reschedule(&self, sched: &mut Scheduler<Event>) {
    let read_due = self.l2_read_reqs.first().map(|(due, _)| *due);
    let write_due = self.l2_write_reqs.first().map(|(due, _)| *due);
    let next = match (read_due, write_due) {
      (Some(read), Some(write)) => Some(read.min(write)),
      (due, None) | (None, due) => due,
    };
    if let Some(due) = next {
      sched.enqueue_at(Event::L2Response, due);
    }
  }

  fn complete(&mut self, req: &mut ChannelReq) {
    let io = &mut req.req;
    let result = match io.is_write {
      true => self.memory.write(io.addr, &io.data),
      false => self.memory.read(io.addr, &mut io.data),
    };
    io.status = match result {
      Ok(()) => IoReqStatus::Ok,
      Err(err) => {
        warn!("{} (channel {:?})", err, req.channel);
        if !io.is_write {
          io.data.iter_mut().for_each(|byte| *byte = 0);
        }
        IoReqStatus::Invalid
      },
    };
  }

  pub fn clear(&mut self) {
    self.l2_read_reqs.clear();
    self.l2_write_reqs.clear();
    self.l2_read_waiting_reqs.clear();
    self.l2_write_waiting_reqs.clear();
  }
}

//true when the request went straight in flight, false when it has to wait
fn submit(in_flight: &mut Queue<(u64, ChannelReq)>, waiting: &mut VecDeque<ChannelReq>,
          req: ChannelReq, due: u64) -> bool {
  let req = match waiting.is_empty() {
    true => match in_flight.push((due, req)) {
      Ok(()) => return true,
      Err((_, req)) => req,
    },
    false => req,
  };
  debug!("L2 FIFO full, {:?} waits for a slot ({} ahead)", req.channel, waiting.len());
  waiting.push_back(req);
  false
}
