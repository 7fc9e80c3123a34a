//! 라우트 테이블
//!
//! 이름 -> `host:port` 매핑. 세대(generation)마다 불변이며
//! 통째로 교체될 뿐 제자리에서 수정되지 않는다.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::info;

use crate::{Error, Result};

/// 기본(폴백) 라우트 키
pub const DEFAULT_ROUTE: &str = "";

/// 라우트 테이블 한 세대
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, String>,

    /// 스토어가 교체 시점에 부여하는 세대 번호
    generation: u64,

    /// 로드 시각
    loaded_at: Instant,
}

impl RouteTable {
    pub fn new(routes: HashMap<String, String>) -> Self {
        Self {
            routes,
            generation: 0,
            loaded_at: Instant::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    /// JSON 객체 `{"name": "host:port", ...}` 파싱
    pub fn from_json(text: &str) -> Result<Self> {
        let routes: HashMap<String, String> = serde_json::from_str(text)?;
        if let Some((name, _)) = routes.iter().find(|(_, backend)| backend.trim().is_empty()) {
            return Err(Error::Config(format!("empty backend for route {:?}", name)));
        }
        Ok(Self::new(routes))
    }

    /// 파일에서 로드
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// 이름 해석, 없으면 기본 라우트
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.routes
            .get(name)
            .or_else(|| self.routes.get(DEFAULT_ROUTE))
            .map(String::as_str)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::empty()
    }
}

/// 현재 라우트 스냅샷 보관소
///
/// 쓰기는 `Arc` 교체 한 번, 읽기는 `Arc` 복제 후 즉시 잠금 해제.
#[derive(Debug)]
pub struct RouteStore {
    current: RwLock<Arc<RouteTable>>,
}

impl RouteStore {
    pub fn new(initial: RouteTable) -> Self {
        let store = Self {
            current: RwLock::new(Arc::new(RouteTable::empty())),
        };
        store.replace(initial);
        store
    }

    /// 현재 세대 스냅샷
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.current.read().clone()
    }

    /// 현재 스냅샷으로 이름 해석
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.snapshot().resolve(name).map(str::to_string)
    }

    /// 새 세대로 통째로 교체, 부여된 세대 번호 반환
    pub fn replace(&self, mut table: RouteTable) -> u64 {
        let mut current = self.current.write();
        let generation = current.generation + 1;
        table.generation = generation;
        *current = Arc::new(table);
        generation
    }

    /// 파일에서 다시 읽어 교체 - 실패하면 이전 세대 유지
    pub async fn reload_from(&self, path: &Path) -> Result<u64> {
        let table = RouteTable::load(path).await?;
        let count = table.len();
        let generation = self.replace(table);
        info!("Routes reloaded from {:?}: generation {} ({} routes)", path, generation, count);
        Ok(generation)
    }
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::new(RouteTable::empty())
    }
}

/// 라우트 파일이 없으면 `{}`로 생성 (상위 디렉터리 포함)
pub async fn ensure_routes_file(path: &Path) -> Result<()> {
    if tokio::fs::metadata(path).await.is_ok() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, b"{}").await?;
    info!("Created empty routes file {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_with_default() {
        let table = RouteTable::from_json(r#"{"a.txt": "10.0.0.1:5000", "": "10.0.0.9:5000"}"#).unwrap();
        assert_eq!(table.resolve("a.txt"), Some("10.0.0.1:5000"));
        assert_eq!(table.resolve("other"), Some("10.0.0.9:5000"));

        let table = RouteTable::from_json(r#"{"a.txt": "10.0.0.1:5000"}"#).unwrap();
        assert_eq!(table.resolve("other"), None);
    }

    #[test]
    fn test_invalid_json() {
        assert!(RouteTable::from_json("[1, 2]").is_err());
        assert!(RouteTable::from_json("{\"a\": 5}").is_err());
        assert!(matches!(RouteTable::from_json(r#"{"a": " "}"#), Err(Error::Config(_))));
    }

    #[test]
    fn test_generations_are_ordered() {
        let store = RouteStore::default();
        let first = store.snapshot();
        assert_eq!(first.generation(), 1);

        let generation = store.replace(RouteTable::from_json(r#"{"a": "h:1"}"#).unwrap());
        assert_eq!(generation, 2);

        // 이전 스냅샷은 그대로
        assert!(first.is_empty());
        assert_eq!(store.snapshot().resolve("a"), Some("h:1"));
        assert_eq!(store.resolve("a").as_deref(), Some("h:1"));
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        std::fs::write(&path, r#"{"a": "h:1"}"#).unwrap();

        let store = RouteStore::default();
        assert_eq!(store.reload_from(&path).await.unwrap(), 2);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(store.reload_from(&path).await.is_err());
        assert_eq!(store.snapshot().generation(), 2);
        assert_eq!(store.resolve("a").as_deref(), Some("h:1"));

        std::fs::remove_file(&path).unwrap();
        assert!(store.reload_from(&path).await.is_err());
        assert_eq!(store.snapshot().generation(), 2);
    }

    #[tokio::test]
    async fn test_ensure_routes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/routes.json");
        ensure_routes_file(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");

        std::fs::write(&path, r#"{"a": "h:1"}"#).unwrap();
        ensure_routes_file(&path).await.unwrap();
        assert!(RouteTable::load(&path).await.unwrap().resolve("a").is_some());
    }
}
