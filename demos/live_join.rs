//! Live left join between two mutable sets, queried through a materialized
//! view while mutations arrive from several threads.
//!
//! Run with: `cargo run --example live_join`

use std::sync::Arc;

use rill::views::MaterializedView;
use rill::{MutableSet, Pipeline, SetError};

#[derive(Clone, Debug)]
struct Order {
    id: u32,
    customer: u32,
    total: i64,
}

#[derive(Clone, Debug)]
struct Customer {
    id: u32,
    name: String,
}

fn main() -> Result<(), SetError> {
    let pipeline = Pipeline::new().expect("spawn pipeline thread");

    let orders = Arc::new(MutableSet::new(|o: &Order| o.id));
    let customers = Arc::new(MutableSet::new(|c: &Customer| c.id));

    // One row per order, labelled with the customer's name once known.
    let labelled = orders.handle().left_join(
        &customers.handle(),
        |o: &Order| o.customer,
        |c: &Customer| c.id,
        |o, c: Option<&Customer>| {
            let name = c.map(|c| c.name.as_str()).unwrap_or("<unknown>");
            (o.id, format!("{name}: {}", o.total))
        },
    );
    let view = MaterializedView::new(&labelled, |row: &(u32, String)| row.0);

    // Orders arrive before their customer is known.
    {
        let orders = Arc::clone(&orders);
        pipeline.invoke(move || {
            orders.insert(Order { id: 1, customer: 10, total: 250 })?;
            orders.insert(Order { id: 2, customer: 10, total: 8_000 })
        })?;
    }
    println!("before customer data: {:?}", view.items());

    // The customer arriving upgrades both rows in place.
    {
        let customers = Arc::clone(&customers);
        pipeline.invoke(move || {
            customers.insert(Customer { id: 10, name: "Alice".into() })
        })?;
    }
    println!("after customer data:  {:?}", view.items());

    // A mutation from another thread blocks until the view is consistent.
    let handle = pipeline.handle();
    let writer = Arc::clone(&orders);
    std::thread::spawn(move || {
        handle.invoke(move || writer.update(Order { id: 1, customer: 10, total: 300 }))
    })
    .join()
    .expect("writer thread")?;
    println!("after concurrent update: {:?}", view.get(&1));

    Ok(())
}
