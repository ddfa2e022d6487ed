// SPDX-License-Identifier: MIT OR Apache-2.0

//! The request-id scenario: a logging helper that finds the current request id
//! without being passed it.

use std::sync::{Arc, Mutex};
use taskwise::{ContextManager, Symbol, Values, gensym};

fn my_log(manager: &ContextManager<Symbol, String>, key: Symbol, out: &Mutex<Vec<String>>) {
    let line = match manager.get_value(&key) {
        Some(request_id) => format!("My request id is: {request_id}"),
        None => "No request id found".to_string(),
    };
    out.lock().unwrap().push(line);
}

#[test]
fn logs_the_bound_request_id() {
    let manager = ContextManager::<Symbol, String>::new();
    let request_id = gensym();
    let out = Mutex::new(Vec::new());

    manager.set_values(Values::from([(request_id, "12345".to_string())]), || {
        my_log(&manager, request_id, &out);
    });
    my_log(&manager, request_id, &out);

    assert_eq!(
        *out.lock().unwrap(),
        vec!["My request id is: 12345", "No request id found"]
    );
    manager.unregister();
}

#[test]
fn only_propagated_threads_see_the_request_id() {
    let manager = ContextManager::<Symbol, String>::new();
    let request_id = gensym();
    let out = Arc::new(Mutex::new(Vec::new()));

    manager.set_values(Values::from([(request_id, "12345".to_string())]), || {
        let (m, o) = (manager.clone(), out.clone());
        std::thread::spawn(move || my_log(&m, request_id, &o))
            .join()
            .unwrap();
        let (m, o) = (manager.clone(), out.clone());
        taskwise::spawn(move || my_log(&m, request_id, &o))
            .join()
            .unwrap();
    });

    assert_eq!(
        *out.lock().unwrap(),
        vec!["No request id found", "My request id is: 12345"]
    );
    manager.unregister();
}
