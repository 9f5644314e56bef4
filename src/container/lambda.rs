use super::{Container, FetchResult};
use crate::errors::{BoxError, ContainerError};
use crate::key::KeySet;
use async_trait::async_trait;

/// 由闭包提供数据的容器，适合包装已有的批量查询方法
pub struct LambdaContainer<F> {
    namespace: String,
    loader: F,
}

impl<F> LambdaContainer<F>
where
    F: Fn(&KeySet) -> Result<FetchResult, BoxError> + Send + Sync + 'static,
{
    pub fn new(namespace: impl Into<String>, loader: F) -> Self {
        Self {
            namespace: namespace.into(),
            loader,
        }
    }
}

#[async_trait]
impl<F> Container for LambdaContainer<F>
where
    F: Fn(&KeySet) -> Result<FetchResult, BoxError> + Send + Sync + 'static,
{
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch(&self, keys: &KeySet) -> Result<FetchResult, ContainerError> {
        if keys.is_empty() {
            return Ok(FetchResult::new());
        }
        let mut result = (self.loader)(keys)
            .map_err(|e| ContainerError::fetch_failed(self.namespace.as_str(), e))?;
        // 闭包可能返回多余的键
        result.retain(|key, _| {
            keys.contains(key) || key.coerced().is_some_and(|alt| keys.contains(&alt))
        });
        Ok(result)
    }
}
