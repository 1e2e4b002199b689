//! In-memory collaborators for unit tests.
mod backend;
mod provider;
mod remote;

pub(crate) use backend::{FakeBackends, Journal};
pub(crate) use provider::FakeProvider;
pub(crate) use remote::{FakeConnector, HostScript};

use crate::plan::TestPlan;

pub(crate) const PLAN_ID: &str = "flows/checkout";

pub(crate) fn sample_plan(threads: u32) -> TestPlan {
    TestPlan::new("shop", PLAN_ID, b"<jmeterTestPlan/>")
        .with_artifact("/work/app/flows/checkout.jmx".into(), "flows/checkout.jmx")
        .with_thread_property("NumUsers", threads)
}
