use std::collections::HashSet;

use super::value::Value;

/// Structural equality. Objects compare by shape name and field values,
/// collections element-wise. A pair of nodes already under comparison is
/// assumed equal, which terminates on cyclic graphs.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut visited = HashSet::new();
        structurally_equal(self, other, &mut visited)
    }
}

fn structurally_equal(a: &Value, b: &Value, visited: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y)
                    .all(|(l, r)| structurally_equal(l, r, visited))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, l)| {
                    y.get(key)
                        .is_some_and(|r| structurally_equal(l, r, visited))
                })
        }
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            if x.shape_name() != y.shape_name() {
                return false;
            }
            if !visited.insert((x.identity(), y.identity())) {
                return true;
            }
            let (xs, ys) = (x.values(), y.values());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(&ys)
                    .all(|(l, r)| structurally_equal(l, r, visited))
        }
        (Value::Collection(x), Value::Collection(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            if !visited.insert((x.identity(), y.identity())) {
                return true;
            }
            let (xs, ys) = (x.items(), y.items());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(&ys)
                    .all(|(l, r)| structurally_equal(l, r, visited))
        }
        _ => false,
    }
}
