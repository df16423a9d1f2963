use rehost_core::model::{
    ConflictPolicy, Connection, ServiceCandidate, TransactionBehavior, TransactionPropagation,
};
use rehost_core::{DeploymentModel, Entity, Location, Modification, Trace, TraceBuilder};
use uuid::Uuid;

pub fn web_thread() -> Location {
    Location::thread("web-1", 100, 1)
}

pub fn billing_thread() -> Location {
    Location::thread("billing-1", 200, 1)
}

pub fn order(id: &str) -> Entity {
    Entity::new("Order", id)
}

/// Web shop split into web, billing and mail components.
///
/// The checkout use case runs in web together with `charge`, which requires a
/// transaction. `refund` lives in billing and `notify` is fired asynchronously
/// into mail. The order store reports conflicts as stale reads.
pub fn shop_model() -> DeploymentModel {
    DeploymentModel::builder()
        .component("web")
        .component("billing")
        .component("mail")
        .use_case("checkout", "web")
        .service_candidate(
            ServiceCandidate::new("charge", "web").with_behavior(TransactionBehavior::Required),
        )
        .service_candidate(
            ServiceCandidate::new("refund", "billing")
                .with_behavior(TransactionBehavior::NotSupported),
        )
        .service_candidate(ServiceCandidate::new("notify", "mail").asynchronous())
        .data_store("orders", ConflictPolicy::StaleRead)
        .entity_type("Order", "orders", None)
        .connection(Connection::remote("web", "billing", 20))
        .connection(Connection::remote("billing", "web", 20))
        .connection(Connection::remote("web", "mail", 50))
        .build()
        .expect("shop model is consistent")
}

/// `charge` extracted into the billing component, reached without transaction propagation
pub fn extracted_billing() -> DeploymentModel {
    shop_model()
        .apply_modifications(&[Modification::MoveServiceCandidate {
            candidate: "charge".to_string(),
            component: "billing".to_string(),
        }])
        .expect("billing extraction applies")
}

/// `notify` running inside the web component, still asynchronous
pub fn inline_notify() -> DeploymentModel {
    shop_model()
        .apply_modifications(&[Modification::MoveServiceCandidate {
            candidate: "notify".to_string(),
            component: "web".to_string(),
        }])
        .expect("notify move applies")
}

/// `refund` pulled back into the web component
pub fn consolidated_refund() -> DeploymentModel {
    shop_model()
        .apply_modifications(&[
            Modification::MoveServiceCandidate {
                candidate: "refund".to_string(),
                component: "web".to_string(),
            },
            Modification::SetConnection {
                connection: Connection::local("web", "billing")
                    .with_propagation(TransactionPropagation::Propagate),
            },
        ])
        .expect("refund consolidation applies")
}

/// Checkout recorded under [`shop_model`]: `charge` runs on the web thread
/// inside the checkout transaction, and the checkout is rolled back.
pub fn rolled_back_checkout() -> Trace {
    TraceBuilder::new(Uuid::new_v4(), web_thread())
        .use_case_start(0, "checkout")
        .begin(10, "checkout-tx")
        .invocation(20, "charge")
        .entry(20, "charge")
        .write(30, order("7"))
        .exit(40, "charge")
        .ret(40, "charge")
        .abort(50, "checkout-tx", "payment declined")
        .use_case_end(60, "checkout")
        .build()
}

/// Checkout recorded under [`shop_model`]: `refund` runs remotely on the
/// billing thread in its own transaction and reads the order the checkout
/// transaction has written but not yet committed.
pub fn remote_refund_checkout() -> Trace {
    TraceBuilder::new(Uuid::new_v4(), web_thread())
        .use_case_start(0, "checkout")
        .begin(10, "checkout-tx")
        .write(20, order("7"))
        .invocation(30, "refund")
        .on(billing_thread())
        .entry(50, "refund")
        .begin(60, "refund-tx")
        .read(70, order("7"))
        .commit(80, "refund-tx")
        .exit(90, "refund")
        .on(web_thread())
        .ret(110, "refund")
        .commit(120, "checkout-tx")
        .use_case_end(130, "checkout")
        .build()
}

/// Checkout that fires `notify` and does not wait for it
pub fn notifying_checkout() -> Trace {
    TraceBuilder::new(Uuid::new_v4(), web_thread())
        .use_case_start(1_000, "checkout")
        .invocation(1_100, "notify")
        .entry(1_100, "notify")
        .exit(1_600, "notify")
        .ret(1_600, "notify")
        .use_case_end(2_000, "checkout")
        .build()
}

/// Checkout with a single synchronous remote call and zero-width crossings
pub fn single_remote_call() -> Trace {
    TraceBuilder::new(Uuid::new_v4(), web_thread())
        .use_case_start(100, "checkout")
        .invocation(200, "refund")
        .entry(200, "refund")
        .exit(300, "refund")
        .ret(300, "refund")
        .use_case_end(1_100, "checkout")
        .build()
}

/// A trace that names a use case no model allocates
pub fn unallocated_trace() -> Trace {
    TraceBuilder::new(Uuid::new_v4(), web_thread())
        .use_case_start(0, "returns")
        .use_case_end(10, "returns")
        .build()
}

pub struct WorkedExample {
    pub model: DeploymentModel,
    pub trace: Trace,
    /// Index of the read that must be reported as stale
    pub stale_read: usize,
    pub entity: Entity,
}

/// Outer transaction writes E, a NOT_SUPPORTED candidate starts a nested
/// transaction on the same thread that reads E.
pub fn worked_example() -> WorkedExample {
    let model = DeploymentModel::builder()
        .component("a")
        .component("b")
        .use_case("uc", "a")
        .service_candidate(
            ServiceCandidate::new("sc1", "b").with_behavior(TransactionBehavior::NotSupported),
        )
        .data_store("db", ConflictPolicy::StaleRead)
        .entity_type("E", "db", None)
        .connection(Connection::local("a", "b"))
        .build()
        .expect("worked example model is consistent");
    let entity = Entity::new("E", "1");

    let trace = TraceBuilder::new(Uuid::new_v4(), Location::thread("app", 1, 1))
        .use_case_start(100, "uc")
        .begin(200, "tx1")
        .write(250, entity.clone())
        .invocation(300, "sc1")
        .entry(300, "sc1")
        .begin(400, "tx2")
        .read(500, entity.clone())
        .commit(700, "tx2")
        .exit(800, "sc1")
        .ret(800, "sc1")
        .commit(900, "tx1")
        .use_case_end(1_000, "uc")
        .build();

    WorkedExample {
        model,
        trace,
        stale_read: 6,
        entity,
    }
}
