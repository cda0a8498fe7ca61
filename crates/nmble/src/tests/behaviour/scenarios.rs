//! Scenario bindings for the gate and dispatcher feature files.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::scenario;

use super::TestWorld;

#[fixture]
fn world() -> RefCell<TestWorld> {
    super::world()
}

#[scenario(
    path = "tests/features/single_resource.feature",
    name = "Waiters are granted the gate in arrival order"
)]
fn gate_fifo_hand_off(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/single_resource.feature",
    name = "A withdrawn waiter leaves the rest of the queue intact"
)]
fn gate_stop_waiting(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/single_resource.feature",
    name = "Aborting refuses every waiter but keeps the holder"
)]
fn gate_abort(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/dispatcher.feature",
    name = "Records are routed by sequence number"
)]
fn dispatcher_routes_by_seq(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/dispatcher.feature",
    name = "Overlapping registrations are refused"
)]
fn dispatcher_refuses_overlap(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/dispatcher.feature",
    name = "A link failure reaches every registered listener"
)]
fn dispatcher_broadcasts_failure(world: RefCell<TestWorld>) {
    drop(world);
}
