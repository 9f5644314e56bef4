use serde_json::{Map, Value};

/// 目标对象的字段访问能力
///
/// 由外部的元数据解析方为每种目标类型提供；装配核心只通过字段名读写，
/// 不依赖反射。读取不存在的字段返回 None。
pub trait Target {
    fn read(&self, field: &str) -> Option<Value>;
    fn write(&mut self, field: &str, value: Value);
}

impl Target for Map<String, Value> {
    fn read(&self, field: &str) -> Option<Value> {
        self.get(field).cloned()
    }

    fn write(&mut self, field: &str, value: Value) {
        self.insert(field.to_string(), value);
    }
}

/// JSON 值作为目标；只有对象可以被读写
impl Target for Value {
    fn read(&self, field: &str) -> Option<Value> {
        self.as_object().and_then(|object| object.read(field))
    }

    fn write(&mut self, field: &str, value: Value) {
        match self.as_object_mut() {
            Some(object) => object.write(field, value),
            None => log::debug!("忽略对非对象值的写入: {}", field),
        }
    }
}

impl<T: Target + ?Sized> Target for Box<T> {
    fn read(&self, field: &str) -> Option<Value> {
        (**self).read(field)
    }

    fn write(&mut self, field: &str, value: Value) {
        (**self).write(field, value)
    }
}
