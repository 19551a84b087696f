//! 嵌入式装配入口：配置加载、组件接线与优雅关闭

pub mod app;
pub mod shutdown;
