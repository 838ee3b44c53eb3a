/// Модуль для анализа ошибок yt-dlp
///
/// Классифицирует stderr yt-dlp в причины, понятные оркестратору стратегий.
use super::StrategyError;

/// Типы ошибок yt-dlp
#[derive(Debug, Clone, PartialEq)]
pub enum YtDlpErrorType {
    /// Нужна авторизация (login wall, checkpoint, устаревшие cookies)
    LoginRequired,
    /// Платформа ограничила частоту запросов
    RateLimited,
    /// Пост или профиль недоступен (приватный, удалён)
    Unavailable,
    /// Проблемы с сетью (таймауты, соединение)
    NetworkError,
    /// Неизвестная ошибка
    Unknown,
}

/// Анализирует stderr yt-dlp и определяет тип ошибки
///
/// # Параметры
/// - `stderr`: содержимое stderr от yt-dlp
///
/// # Возвращает
/// - `YtDlpErrorType`: тип определенной ошибки
pub fn analyze_ytdlp_error(stderr: &str) -> YtDlpErrorType {
    let stderr_lower = stderr.to_lowercase();

    // Лимиты проверяем первыми: Instagram отвечает "please wait" вместе с login-подсказками
    if stderr_lower.contains("http error 429")
        || stderr_lower.contains("too many requests")
        || stderr_lower.contains("rate-limit")
        || stderr_lower.contains("rate limit")
        || stderr_lower.contains("please wait a few minutes")
    {
        return YtDlpErrorType::RateLimited;
    }

    if stderr_lower.contains("login required")
        || stderr_lower.contains("use --cookies")
        || stderr_lower.contains("cookies are no longer valid")
        || stderr_lower.contains("checkpoint")
        || stderr_lower.contains("challenge_required")
        || stderr_lower.contains("http error 401")
        || stderr_lower.contains("http error 403")
    {
        return YtDlpErrorType::LoginRequired;
    }

    if stderr_lower.contains("http error 404")
        || stderr_lower.contains("not found")
        || stderr_lower.contains("this content isn't available")
        || stderr_lower.contains("private")
        || stderr_lower.contains("has been removed")
        || stderr_lower.contains("does not exist")
        || stderr_lower.contains("unsupported url")
    {
        return YtDlpErrorType::Unavailable;
    }

    if stderr_lower.contains("timeout")
        || stderr_lower.contains("timed out")
        || stderr_lower.contains("connection")
        || stderr_lower.contains("network")
        || stderr_lower.contains("socket")
        || stderr_lower.contains("proxy")
        || stderr_lower.contains("name resolution")
    {
        return YtDlpErrorType::NetworkError;
    }

    YtDlpErrorType::Unknown
}

/// Переводит тип ошибки в `StrategyError`
///
/// Неизвестные ошибки считаются сетевыми: следующая стратегия всё равно попробует.
pub fn to_strategy_error(error_type: &YtDlpErrorType, stderr: &str) -> StrategyError {
    let detail = last_error_line(stderr);
    match error_type {
        YtDlpErrorType::LoginRequired => StrategyError::AuthRequired(detail),
        YtDlpErrorType::RateLimited => StrategyError::RateLimited { retry_after: None },
        YtDlpErrorType::Unavailable => StrategyError::NotFound(detail),
        YtDlpErrorType::NetworkError | YtDlpErrorType::Unknown => StrategyError::TransientNetwork(detail),
    }
}

/// Возвращает рекомендации по исправлению ошибки для логов
pub fn get_fix_recommendations(error_type: &YtDlpErrorType) -> &'static str {
    match error_type {
        YtDlpErrorType::LoginRequired => {
            "🔧 Обнови cookies: INSTAGRAM_COOKIES_FILE или `reelscout import-cookies`"
        }
        YtDlpErrorType::RateLimited => "🔧 Увеличь паузы или включи ротацию прокси (PROXY_LIST, ROTATE_PROXIES)",
        YtDlpErrorType::Unavailable => "ℹ️  Контент недоступен - действий не требуется",
        YtDlpErrorType::NetworkError => "🔧 Проверь соединение и прокси",
        YtDlpErrorType::Unknown => "🔧 Проверь, что yt-dlp обновлен до последней версии",
    }
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("yt-dlp failed")
        .trim()
        .chars()
        .take(300)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_wall_and_login() {
        let stderr = "ERROR: [Instagram] DLx4biRMz7e: Requested content is not available, rate-limit reached or login required. Use --cookies";
        // "rate-limit reached or login required" is Instagram's generic wall, treated as a rate limit
        assert_eq!(analyze_ytdlp_error(stderr), YtDlpErrorType::RateLimited);
        assert_eq!(
            analyze_ytdlp_error("ERROR: [Instagram] examplepage: login required"),
            YtDlpErrorType::LoginRequired
        );
    }

    #[test]
    fn test_other_classes() {
        assert_eq!(analyze_ytdlp_error("ERROR: HTTP Error 404: Not Found"), YtDlpErrorType::Unavailable);
        assert_eq!(analyze_ytdlp_error("ERROR: HTTP Error 429: Too Many Requests"), YtDlpErrorType::RateLimited);
        assert_eq!(analyze_ytdlp_error("ERROR: Connection reset by peer"), YtDlpErrorType::NetworkError);
        assert_eq!(analyze_ytdlp_error("something odd"), YtDlpErrorType::Unknown);
    }

    #[test]
    fn test_to_strategy_error_keeps_error_line() {
        let stderr = "[instagram] foo\nERROR: HTTP Error 404: Not Found\n";
        let err = to_strategy_error(&analyze_ytdlp_error(stderr), stderr);
        assert_eq!(err, StrategyError::NotFound("ERROR: HTTP Error 404: Not Found".to_string()));
    }
}
