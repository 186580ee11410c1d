use log::info;

use shared_ownership::{make_shared, Shared, Unique, Weak};

#[derive(Debug, Default)]
struct Student {
    age: u32,
    name: String,
}

impl Student {
    fn new(age: u32, name: &str) -> Student {
        Student {
            age,
            name: name.to_owned(),
        }
    }
}

impl Drop for Student {
    fn drop(&mut self) {
        info!("student {} is gone", self.name);
    }
}

fn main() {
    env_logger::init();

    let first = Unique::new(Student::new(27, "deeprain"));
    let second = first;
    info!("unique owner: age[{}], name[{}]", second.age, second.name);

    let a = Shared::from(second);
    let b = a.clone();
    let w: Weak<Student> = Shared::downgrade(&a);
    info!("use_count after clone: {}", Shared::use_count(&b));

    drop(a);
    drop(b);
    info!("expired: {}, lock empty: {}", w.expired(), Shared::is_empty(&w.lock()));

    let in_place = make_shared(Student::default());
    info!("in-place student: {:?}", in_place);
}
