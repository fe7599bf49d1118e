//! Group a set of employees by department and watch the group count move as
//! people change teams.
//!
//! Run with: `cargo run --example department_groups`

use rill::views::counts;
use rill::{MutableSet, PushObserver, PushStream};

#[derive(Clone, Debug)]
struct Employee {
    id: u32,
    dept: &'static str,
}

struct PrintCount;

impl PushObserver<usize> for PrintCount {
    fn on_next(&mut self, value: usize) {
        println!("departments with members: {value}");
    }
}

fn main() {
    let employees = MutableSet::new(|e: &Employee| e.id);
    let departments = employees.handle().group_by(|e| e.dept);
    let department_count = counts(&departments);
    let _sub = department_count.subscribe(Box::new(PrintCount));

    let staff = [
        Employee { id: 1, dept: "Eng" },
        Employee { id: 2, dept: "Eng" },
        Employee { id: 3, dept: "Sales" },
    ];
    for employee in staff {
        employees.insert(employee).unwrap();
    }

    // Bob moves to Sales; Eng still has Alice, so the count is unchanged.
    employees.update(Employee { id: 2, dept: "Sales" }).unwrap();

    // Alice leaves; Eng empties and its group disappears.
    employees.remove(&1).unwrap();
}
